use async_trait::async_trait;
use funnel::Operation;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_min() -> i64 {
    0
}

fn default_max() -> i64 {
    100
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RandomNumberInput {
    /// The minimum number.
    #[serde(default = "default_min")]
    pub min: i64,

    /// The maximum number.
    #[serde(default = "default_max")]
    pub max: i64,
}

#[derive(Debug, Serialize)]
pub struct RandomNumberOutput {
    pub number: i64,
}

pub struct GetRandomNumber;

#[async_trait]
impl Operation for GetRandomNumber {
    type Input = RandomNumberInput;
    type Output = RandomNumberOutput;

    fn name(&self) -> &str {
        "get_random_number"
    }

    fn description(&self) -> &str {
        "Get a random number."
    }

    async fn call(&self, input: RandomNumberInput) -> anyhow::Result<RandomNumberOutput> {
        if input.min > input.max {
            anyhow::bail!("min ({}) is greater than max ({})", input.min, input.max);
        }
        let number = rand::rng().random_range(input.min..=input.max);
        Ok(RandomNumberOutput { number })
    }
}
