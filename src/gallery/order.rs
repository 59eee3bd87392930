//! Ranking helpers for reorder and renumber.
//!
//! Clients send reorder payloads with loosely typed values (`3`, `3.0`,
//! `"3"`), so both the id and the requested order go through [`LooseInt`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::GalleryError;
use crate::metadata::store::ImageRecord;

/// An integer as sent by a client: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseInt {
    Int(i64),
    Float(f64),
    Text(String),
    /// Anything else (`true`, objects, arrays). Never coercible.
    Other(serde_json::Value),
}

impl LooseInt {
    /// The integer this value denotes, if any. Floats must be integral.
    pub fn coerce(&self) -> Option<i64> {
        match self {
            LooseInt::Int(n) => Some(*n),
            LooseInt::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                if *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            LooseInt::Float(_) => None,
            LooseInt::Text(s) => s.trim().parse().ok(),
            LooseInt::Other(_) => None,
        }
    }
}

impl From<i64> for LooseInt {
    fn from(n: i64) -> Self {
        LooseInt::Int(n)
    }
}

/// One entry of a reorder request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReorderItem {
    /// Image id.
    #[serde(default)]
    #[schema(value_type = Option<i64>)]
    pub id: Option<LooseInt>,
    /// Requested position. Negative values clamp to 0.
    #[serde(default)]
    #[schema(value_type = Option<i64>)]
    pub order: Option<LooseInt>,
}

impl ReorderItem {
    pub fn new(id: i64, order: i64) -> Self {
        Self {
            id: Some(id.into()),
            order: Some(order.into()),
        }
    }
}

/// Validate a reorder payload into `image id -> requested order`.
///
/// The last occurrence of a repeated id wins.
pub fn requested_orders(items: &[ReorderItem]) -> Result<HashMap<i64, u64>, GalleryError> {
    if items.is_empty() {
        return Err(GalleryError::invalid("reorder payload must contain at least one item"));
    }

    let mut requested = HashMap::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let id = item
            .id
            .as_ref()
            .and_then(LooseInt::coerce)
            .ok_or_else(|| GalleryError::invalid(format!("item {index}: missing or invalid id")))?;
        let order = item
            .order
            .as_ref()
            .and_then(LooseInt::coerce)
            .ok_or_else(|| {
                GalleryError::invalid(format!("item {index}: missing or invalid order"))
            })?;
        requested.insert(id, order.max(0) as u64);
    }
    Ok(requested)
}

/// Rank `records` by `(effective order, id)` and return `(id, rank)` for
/// every record whose stored `sort_order` differs from its rank.
pub fn plan_ranks<F>(records: &[ImageRecord], effective: F) -> Vec<(i64, u32)>
where
    F: Fn(&ImageRecord) -> u64,
{
    let mut ranked: Vec<(u64, i64, u32)> = records
        .iter()
        .map(|r| (effective(r), r.id, r.sort_order))
        .collect();
    ranked.sort_unstable_by_key(|&(order, id, _)| (order, id));

    ranked
        .into_iter()
        .enumerate()
        .filter_map(|(rank, (_, id, current))| {
            let rank = rank as u32;
            (rank != current).then_some((id, rank))
        })
        .collect()
}
