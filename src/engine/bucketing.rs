//! Consistent bucketing of subjects
//!
//! Maps a `(key, subject)` pair to a stable bucket in `[0, 100)` using
//! SHA-256, so every instance places a subject identically without
//! coordination. Flag rollout and variant selection hash different inputs,
//! which keeps a subject's rollout bucket independent of its variant bucket.

use crate::model::Variant;
use sha2::{Digest, Sha256};

/// Number of buckets percentages are expressed in
pub const BUCKET_COUNT: u32 = 100;

/// Salt appended to the hash input for variant selection
const VARIANT_SALT: &str = "variant";

fn hash_bucket(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % BUCKET_COUNT
}

/// Stable rollout bucket for a subject under a flag or experiment key
pub fn bucket(key: &str, subject_id: &str) -> u32 {
    hash_bucket(&format!("{}:{}", key, subject_id))
}

/// Whether the subject falls inside a rollout of `percentage`
///
/// 0 or less is always out and 100 or more always in, without hashing.
pub fn in_rollout(key: &str, subject_id: &str, percentage: i32) -> bool {
    if percentage <= 0 {
        return false;
    }
    if percentage >= BUCKET_COUNT as i32 {
        return true;
    }
    (bucket(key, subject_id) as i32) < percentage
}

/// Stable variant bucket, salted so it differs from [`bucket`]
pub fn variant_bucket(key: &str, subject_id: &str) -> u32 {
    hash_bucket(&format!("{}:{}:{}", key, subject_id, VARIANT_SALT))
}

/// Variants in the fixed walk order: control first, then by key
pub fn ordered_variants(variants: &[Variant]) -> Vec<&Variant> {
    let mut ordered: Vec<&Variant> = variants.iter().collect();
    ordered.sort_by(|a, b| {
        b.is_control
            .cmp(&a.is_control)
            .then_with(|| a.key.cmp(&b.key))
    });
    ordered
}

/// Pick the variant whose cumulative weight range contains the subject's bucket
///
/// Returns `None` only for an empty variant list. A bucket beyond the summed
/// weights falls through to the last variant in walk order.
pub fn bucket_variant<'a>(
    key: &str,
    subject_id: &str,
    variants: &'a [Variant],
) -> Option<&'a Variant> {
    let ordered = ordered_variants(variants);
    let target = variant_bucket(key, subject_id) as i32;

    let mut cumulative = 0;
    for variant in &ordered {
        cumulative += variant.weight;
        if target < cumulative {
            return Some(variant);
        }
    }

    ordered.last().copied()
}

#[cfg(test)]
#[path = "bucketing_test.rs"]
mod tests;
