//! Construction-time configuration: concurrency and the per-priority weight table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Validated per-priority weights. Index `n` is the weight of priority `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WeightSource", into = "Vec<u32>")]
pub struct WeightTable {
	weights: Vec<u32>,
}

impl WeightTable {
	/// Creates a table, rejecting empty tables and zero weights.
	pub fn new(weights: Vec<u32>) -> Result<Self, ConfigError> {
		if weights.is_empty() {
			return Err(ConfigError::EmptyWeights);
		}
		if let Some(priority) = weights.iter().position(|&w| w == 0) {
			return Err(ConfigError::ZeroWeight { priority });
		}
		Ok(Self { weights })
	}

	/// Number of priorities.
	pub fn len(&self) -> usize {
		self.weights.len()
	}

	/// Always `false` for a validated table.
	pub fn is_empty(&self) -> bool {
		self.weights.is_empty()
	}

	pub fn get(&self, priority: usize) -> Option<u32> {
		self.weights.get(priority).copied()
	}

	pub fn as_slice(&self) -> &[u32] {
		&self.weights
	}

	/// Sum of all weights.
	pub fn total(&self) -> u64 {
		self.weights.iter().map(|&w| u64::from(w)).sum()
	}
}

impl TryFrom<Vec<u32>> for WeightTable {
	type Error = ConfigError;

	fn try_from(weights: Vec<u32>) -> Result<Self, Self::Error> {
		Self::new(weights)
	}
}

impl From<WeightTable> for Vec<u32> {
	fn from(table: WeightTable) -> Self {
		table.weights
	}
}

/// Parses a comma separated list such as `"1, 2, 4"`.
impl FromStr for WeightTable {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.trim().is_empty() {
			return Err(ConfigError::EmptyWeights);
		}
		let weights = s
			.split(',')
			.map(|token| {
				let token = token.trim();
				token.parse::<u32>().map_err(|_| ConfigError::InvalidWeight { token: token.to_string() })
			})
			.collect::<Result<Vec<_>, _>>()?;
		Self::new(weights)
	}
}

impl fmt::Display for WeightTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, w) in self.weights.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			write!(f, "{w}")?;
		}
		Ok(())
	}
}

/// Accepted on-disk spellings of a weight table.
#[derive(Deserialize)]
#[serde(untagged)]
enum WeightSource {
	List(Vec<u32>),
	Text(String),
}

impl TryFrom<WeightSource> for WeightTable {
	type Error = ConfigError;

	fn try_from(source: WeightSource) -> Result<Self, Self::Error> {
		match source {
			WeightSource::List(weights) => Self::new(weights),
			WeightSource::Text(text) => text.parse(),
		}
	}
}

/// Full lock configuration.
///
/// ```toml
/// concurrency = 8
/// weights = [1, 2, 4]   # or "1,2,4"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiLockConfig {
	/// Total execution slots shared by all priorities.
	pub concurrency: usize,
	/// Weight of each priority, indexed by priority.
	pub weights: WeightTable,
}

impl MultiLockConfig {
	/// Creates and validates a configuration.
	pub fn new(concurrency: usize, weights: WeightTable) -> Result<Self, ConfigError> {
		let config = Self { concurrency, weights };
		config.validate()?;
		Ok(config)
	}

	/// Parses a TOML document and validates it.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks what the weight table cannot check on its own.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.concurrency == 0 {
			return Err(ConfigError::ZeroConcurrency);
		}
		Ok(())
	}
}
