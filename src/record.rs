use crate::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One street as it travels from the source, through the queue, into the store.
///
/// `street_id` is the unique key in the store; every other field is
/// informational and is overwritten when the same street is delivered again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    #[serde(rename = "streetId")]
    pub street_id: i64,
    pub region_code: i32,
    pub region_name: String,
    pub city_code: i32,
    pub city_name: String,
    pub street_code: i32,
    pub street_name: String,
    pub street_name_status: String,
    pub official_code: i64,
}

impl Street {
    pub fn validate(&self) -> Result<()> {
        if self.street_id <= 0 {
            return Err(Error::Validation(format!(
                "street id must be positive, got {}",
                self.street_id
            )));
        }
        if self.street_name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "street {} has no street_name",
                self.street_id
            )));
        }
        if self.city_name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "street {} has no city_name",
                self.street_id
            )));
        }
        Ok(())
    }
}

/// Cities the publisher knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum City {
    TelAviv,
    Jerusalem,
    Haifa,
    BeerSheva,
    RishonLezion,
    PetahTikva,
    Ashdod,
    Netanya,
    Eilat,
}

impl City {
    pub const ALL: [City; 9] = [
        City::TelAviv,
        City::Jerusalem,
        City::Haifa,
        City::BeerSheva,
        City::RishonLezion,
        City::PetahTikva,
        City::Ashdod,
        City::Netanya,
        City::Eilat,
    ];

    /// English display name, also stored in `Street::city_name`.
    pub fn display_name(&self) -> &'static str {
        match self {
            City::TelAviv => "Tel Aviv",
            City::Jerusalem => "Jerusalem",
            City::Haifa => "Haifa",
            City::BeerSheva => "Beer Sheva",
            City::RishonLezion => "Rishon LeZion",
            City::PetahTikva => "Petah Tikva",
            City::Ashdod => "Ashdod",
            City::Netanya => "Netanya",
            City::Eilat => "Eilat",
        }
    }

    /// Name used by the upstream dataset, which is in Hebrew.
    pub fn source_name(&self) -> &'static str {
        match self {
            City::TelAviv => "תל אביב - יפו",
            City::Jerusalem => "ירושלים",
            City::Haifa => "חיפה",
            City::BeerSheva => "באר שבע",
            City::RishonLezion => "ראשון לציון",
            City::PetahTikva => "פתח תקווה",
            City::Ashdod => "אשדוד",
            City::Netanya => "נתניה",
            City::Eilat => "אילת",
        }
    }

    pub fn from_source_name(name: &str) -> Option<City> {
        let name = name.trim();
        City::ALL.into_iter().find(|c| c.source_name() == name)
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => f.write_str(self.display_name()),
        }
    }
}
