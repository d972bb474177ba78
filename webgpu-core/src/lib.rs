/*! This library safely implements the core of a WebGPU binding.
 *  It validates every call against WebGPU's rules, tracks resource
 *  lifetimes, orders submissions and drives the asynchronous signals
 *  (mapping, work-done, device loss, error scopes) on top of a backend
 *  described by `webgpu-hal`.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod binding_model;
pub mod capabilities;
pub mod command;
pub mod device;
pub mod error;
pub mod hal_api;
pub mod instance;
pub mod pipeline;
pub mod resource;
pub mod signal;
pub mod storage;
pub mod validation;

pub use hal::{api, MAX_BIND_GROUPS, MAX_COLOR_ATTACHMENTS};

use std::borrow::Cow;

/// The index of a queue submission.
///
/// These are the values stored in `Device::fence`.
pub type SubmissionIndex = hal::FenceValue;

type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<fxhash::FxHasher>>;

pub type Label<'a> = Option<Cow<'a, str>>;

trait LabelHelpers<'a> {
    fn borrow_option(&'a self) -> Option<&'a str>;
    fn to_hal(&'a self, flags: wgt::InstanceFlags) -> Option<&'a str>;
    fn borrow_or_default(&'a self) -> &'a str;
}
impl<'a> LabelHelpers<'a> for Label<'a> {
    fn borrow_option(&'a self) -> Option<&'a str> {
        self.as_ref().map(|cow| cow.as_ref())
    }
    fn to_hal(&'a self, flags: wgt::InstanceFlags) -> Option<&'a str> {
        if flags.contains(wgt::InstanceFlags::DISCARD_HAL_LABELS) {
            return None;
        }

        self.as_ref().map(|cow| cow.as_ref())
    }
    fn borrow_or_default(&'a self) -> &'a str {
        self.borrow_option().unwrap_or_default()
    }
}

pub fn hal_label(opt: Option<&str>, flags: wgt::InstanceFlags) -> Option<&str> {
    if flags.contains(wgt::InstanceFlags::DISCARD_HAL_LABELS) {
        return None;
    }

    opt
}

/// Log an entry point of the public API.
#[macro_export]
macro_rules! api_log {
    ($($arg:tt)+) => (log::trace!($($arg)+))
}

/// Log the creation and destruction of backend objects.
#[macro_export]
macro_rules! resource_log {
    ($($arg:tt)+) => (log::trace!($($arg)+))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discarded_hal_labels() {
        let label: Label = Some(Cow::Borrowed("mesh"));
        assert_eq!(label.to_hal(wgt::InstanceFlags::empty()), Some("mesh"));
        assert_eq!(
            label.to_hal(wgt::InstanceFlags::DISCARD_HAL_LABELS),
            None
        );
        let unnamed: Label = None;
        assert_eq!(unnamed.borrow_or_default(), "");
        assert_eq!(
            hal_label(Some("mesh"), wgt::InstanceFlags::DISCARD_HAL_LABELS),
            None
        );
    }
}
