use async_trait::async_trait;
use funnel::Operation;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "Celsius",
            TemperatureUnit::Fahrenheit => "Fahrenheit",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CurrentWeatherInput {
    /// The city and state, e.g. San Francisco, CA.
    pub location: String,

    /// The unit of temperature.
    #[serde(default)]
    pub unit: TemperatureUnit,
}

#[derive(Debug, Serialize)]
pub struct CurrentWeatherOutput {
    pub weather: String,
}

pub struct GetCurrentWeather;

#[async_trait]
impl Operation for GetCurrentWeather {
    type Input = CurrentWeatherInput;
    type Output = CurrentWeatherOutput;

    fn name(&self) -> &str {
        "get_current_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather in a given location."
    }

    async fn call(&self, input: CurrentWeatherInput) -> anyhow::Result<CurrentWeatherOutput> {
        Ok(CurrentWeatherOutput {
            weather: format!(
                "The weather in {} is currently 22 degrees {}.",
                input.location,
                input.unit.as_str()
            ),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForecastWeatherInput {
    /// The city and state, e.g. San Francisco, CA.
    pub location: String,

    /// The forecast, e.g. today, tomorrow.
    pub forecast: String,
}

#[derive(Debug, Serialize)]
pub struct ForecastWeatherOutput {
    pub forecast: String,
}

pub struct GetForecastWeather;

#[async_trait]
impl Operation for GetForecastWeather {
    type Input = ForecastWeatherInput;
    type Output = ForecastWeatherOutput;

    fn name(&self) -> &str {
        "get_forecast_weather"
    }

    fn description(&self) -> &str {
        "Get the forecasted weather in a given location."
    }

    async fn call(&self, input: ForecastWeatherInput) -> anyhow::Result<ForecastWeatherOutput> {
        Ok(ForecastWeatherOutput {
            forecast: format!(
                "The weather {} in {} is going to be 22 degrees Celsius.",
                input.forecast, input.location
            ),
        })
    }
}
