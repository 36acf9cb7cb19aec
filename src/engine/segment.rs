//! Segment rule matching
//!
//! Pure predicate over a [`UserContext`]. Every populated rule must hold;
//! unpopulated ones are vacuously true. List membership is exact and
//! case-sensitive. A subject missing an attribute that a list rule
//! constrains does not match.

use crate::model::{SegmentRules, UserContext};

fn member_of(allowed: &[String], value: Option<&String>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    value.is_some_and(|v| allowed.contains(v))
}

/// Whether the subject satisfies all populated rules
pub fn matches(ctx: &UserContext, rules: &SegmentRules) -> bool {
    if !member_of(&rules.roles, ctx.role.as_ref()) {
        return false;
    }
    if !member_of(&rules.countries, ctx.country.as_ref()) {
        return false;
    }
    if !member_of(&rules.cities, ctx.city.as_ref()) {
        return false;
    }
    if !member_of(&rules.platforms, ctx.platform.as_ref()) {
        return false;
    }
    if !member_of(&rules.loyalty_tiers, ctx.loyalty_tier.as_ref()) {
        return false;
    }

    if rules.min_rides.is_some_and(|min| ctx.total_rides < min) {
        return false;
    }
    if rules.max_rides.is_some_and(|max| ctx.total_rides > max) {
        return false;
    }
    if rules.min_rating.is_some_and(|min| ctx.rating < min) {
        return false;
    }
    if rules
        .min_account_age_days
        .is_some_and(|min| ctx.account_age_days < min)
    {
        return false;
    }

    true
}
