//! ConnectedDrive portal regions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown region: {0}")]
pub struct UnknownRegion(pub String);

/// Portal region an account is registered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Region {
    NorthAmerica,
    China,
    RestOfWorld,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::NorthAmerica, Region::China, Region::RestOfWorld];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "north_america",
            Region::China => "china",
            Region::RestOfWorld => "rest_of_world",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; spaces and dashes count as underscores
impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == normalized)
            .ok_or_else(|| UnknownRegion(s.to_string()))
    }
}

impl TryFrom<String> for Region {
    type Error = UnknownRegion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.as_str().to_string()
    }
}
