//! Activation processing.
//!
//! The effective status of a focus combines its administrative status with
//! the validity window: an explicit administrative status always wins,
//! otherwise the focus is enabled inside the window and disabled outside.

use chrono::{DateTime, Utc};
use tracing::debug;
use xavyo_delta::{names, IdentityObject, ItemDelta, ItemPath, RealValue};

use crate::context::LensContext;
use crate::error::Result;
use crate::types::{ActivationStatus, ValidityStatus};

/// Path of the administrative status.
#[must_use]
pub fn administrative_status_path() -> ItemPath {
    ItemPath::from_names([names::ACTIVATION, names::ADMINISTRATIVE_STATUS])
}

/// Path of the effective status.
#[must_use]
pub fn effective_status_path() -> ItemPath {
    ItemPath::from_names([names::ACTIVATION, names::EFFECTIVE_STATUS])
}

/// Path of the validity status.
#[must_use]
pub fn validity_status_path() -> ItemPath {
    ItemPath::from_names([names::ACTIVATION, names::VALIDITY_STATUS])
}

/// Position of `now` relative to `[valid_from, valid_to)`. `None` when no
/// window is set.
#[must_use]
pub fn compute_validity_status(
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<ValidityStatus> {
    if valid_from.is_none() && valid_to.is_none() {
        return None;
    }
    if valid_from.is_some_and(|from| now < from) {
        return Some(ValidityStatus::Before);
    }
    if valid_to.is_some_and(|to| now >= to) {
        return Some(ValidityStatus::After);
    }
    Some(ValidityStatus::In)
}

/// Combine administrative and validity status.
#[must_use]
pub fn compute_effective_status(
    administrative: Option<ActivationStatus>,
    validity: Option<ValidityStatus>,
) -> ActivationStatus {
    if let Some(status) = administrative {
        return status;
    }
    match validity {
        Some(ValidityStatus::Before | ValidityStatus::After) => ActivationStatus::Disabled,
        Some(ValidityStatus::In) | None => ActivationStatus::Enabled,
    }
}

fn timestamp(object: &IdentityObject, name: &str) -> Result<Option<DateTime<Utc>>> {
    let path = ItemPath::from_names([names::ACTIVATION, name]);
    Ok(object
        .property_value(&path)?
        .as_ref()
        .and_then(RealValue::as_timestamp))
}

fn status(object: &IdentityObject, path: &ItemPath) -> Result<Option<ActivationStatus>> {
    object
        .property_value(path)?
        .as_ref()
        .and_then(RealValue::as_str)
        .map(str::parse)
        .transpose()
}

/// Effective status of an object at `now`.
///
/// # Errors
///
/// Returns a schema error for malformed activation data.
pub fn effective_status_of(object: &IdentityObject, now: DateTime<Utc>) -> Result<ActivationStatus> {
    let administrative = status(object, &administrative_status_path())?;
    let validity = compute_validity_status(
        timestamp(object, names::VALID_FROM)?,
        timestamp(object, names::VALID_TO)?,
        now,
    );
    Ok(compute_effective_status(administrative, validity))
}

/// Record effective and validity status changes of the focus into the
/// secondary delta of the current wave.
///
/// A delta is recorded only when the computed value differs from the stored
/// one or none is stored, except that an effective status delta is always
/// recorded when the primary delta touches the administrative status.
///
/// # Errors
///
/// Returns a schema error for malformed activation data.
pub fn process_focus_activation(ctx: &mut LensContext) -> Result<()> {
    if ctx.focus.is_delete() {
        return Ok(());
    }
    let wave = ctx.projection_wave;
    let Some(object) = ctx.focus.object_before_wave(wave + 1)? else {
        return Ok(());
    };

    let administrative = status(&object, &administrative_status_path())?;
    let validity = compute_validity_status(
        timestamp(&object, names::VALID_FROM)?,
        timestamp(&object, names::VALID_TO)?,
        ctx.now,
    );
    let effective = compute_effective_status(administrative, validity);
    let stored_effective = status(&object, &effective_status_path())?;

    let already_recorded = ctx
        .focus
        .secondary_deltas
        .range(..wave)
        .any(|(_, d)| d.has_item_delta(&effective_status_path()));
    let forced = !already_recorded && ctx.focus.primary_touches(&administrative_status_path());
    if stored_effective != Some(effective) || forced {
        debug!(
            effective = %effective,
            stored = ?stored_effective,
            forced,
            "Recording effective status"
        );
        ctx.focus.swallow_to_secondary(
            wave,
            ItemDelta::replace_property(effective_status_path(), [effective.as_str()]),
        )?;
    }

    let stored_validity = object
        .property_value(&validity_status_path())?
        .and_then(|v| v.as_str().map(str::to_string));
    let computed_validity = validity.map(|v| v.as_str().to_string());
    if stored_validity != computed_validity {
        ctx.focus.swallow_to_secondary(
            wave,
            ItemDelta::replace_property(validity_status_path(), computed_validity),
        )?;
    }
    Ok(())
}
