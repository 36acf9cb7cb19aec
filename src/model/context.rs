use serde::{Deserialize, Serialize};

/// Attributes of the subject a flag or experiment is evaluated for
///
/// Supplied by the caller on every evaluation and never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserContext {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(rename = "totalRides", default)]
    pub total_rides: u32,

    #[serde(default)]
    pub rating: f64,

    #[serde(rename = "accountAgeDays", default)]
    pub account_age_days: u32,

    #[serde(rename = "loyaltyTier", skip_serializing_if = "Option::is_none")]
    pub loyalty_tier: Option<String>,
}

impl UserContext {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    pub fn with_total_rides(mut self, rides: u32) -> Self {
        self.total_rides = rides;
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_account_age_days(mut self, days: u32) -> Self {
        self.account_age_days = days;
        self
    }

    pub fn with_loyalty_tier(mut self, tier: impl Into<String>) -> Self {
        self.loyalty_tier = Some(tier.into());
        self
    }
}

/// Conjunctive targeting rules shared by flags and experiments
///
/// Every populated field must be satisfied. Empty lists and unset
/// thresholds place no constraint on the subject.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SegmentRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    #[serde(rename = "loyaltyTiers", default, skip_serializing_if = "Vec::is_empty")]
    pub loyalty_tiers: Vec<String>,

    #[serde(rename = "minRides", skip_serializing_if = "Option::is_none")]
    pub min_rides: Option<u32>,

    #[serde(rename = "maxRides", skip_serializing_if = "Option::is_none")]
    pub max_rides: Option<u32>,

    #[serde(rename = "minRating", skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f64>,

    #[serde(rename = "minAccountAgeDays", skip_serializing_if = "Option::is_none")]
    pub min_account_age_days: Option<u32>,
}

impl SegmentRules {
    /// True when no field is populated, i.e. the rules match everyone
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.countries.is_empty()
            && self.cities.is_empty()
            && self.platforms.is_empty()
            && self.loyalty_tiers.is_empty()
            && self.min_rides.is_none()
            && self.max_rides.is_none()
            && self.min_rating.is_none()
            && self.min_account_age_days.is_none()
    }
}
