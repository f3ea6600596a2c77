//! Operations compiled into funnelctl.

mod random;
mod weather;

pub use random::GetRandomNumber;
pub use weather::{GetCurrentWeather, GetForecastWeather};

use funnel::{OperationCatalog, RegistryError};

/// Every built-in operation, keyed by its name.
pub fn catalog() -> Result<OperationCatalog, RegistryError> {
    let mut catalog = OperationCatalog::new();
    catalog.register(GetCurrentWeather)?;
    catalog.register(GetForecastWeather)?;
    catalog.register(GetRandomNumber)?;
    Ok(catalog)
}
