use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;

/// Service categories a request can be raised under and a worker can declare.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Plumbing,
    Electrical,
    Carpentry,
    Painting,
    Cleaning,
    ApplianceRepair,
    PestControl,
    Gardening,
    Moving,
    Other,
}

impl ServiceCategory {
    /// Stored string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Plumbing => "plumbing",
            ServiceCategory::Electrical => "electrical",
            ServiceCategory::Carpentry => "carpentry",
            ServiceCategory::Painting => "painting",
            ServiceCategory::Cleaning => "cleaning",
            ServiceCategory::ApplianceRepair => "appliance_repair",
            ServiceCategory::PestControl => "pest_control",
            ServiceCategory::Gardening => "gardening",
            ServiceCategory::Moving => "moving",
            ServiceCategory::Other => "other",
        }
    }
}

impl std::str::FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plumbing" => Ok(ServiceCategory::Plumbing),
            "electrical" => Ok(ServiceCategory::Electrical),
            "carpentry" => Ok(ServiceCategory::Carpentry),
            "painting" => Ok(ServiceCategory::Painting),
            "cleaning" => Ok(ServiceCategory::Cleaning),
            "appliance_repair" => Ok(ServiceCategory::ApplianceRepair),
            "pest_control" => Ok(ServiceCategory::PestControl),
            "gardening" => Ok(ServiceCategory::Gardening),
            "moving" => Ok(ServiceCategory::Moving),
            "other" => Ok(ServiceCategory::Other),
            _ => Err(format!("Unknown service category: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_through_str() {
        for cat in [
            ServiceCategory::Plumbing,
            ServiceCategory::ApplianceRepair,
            ServiceCategory::Other,
        ] {
            assert_eq!(ServiceCategory::from_str(cat.as_str()), Ok(cat));
        }
        assert!(ServiceCategory::from_str("welding").is_err());
    }
}
