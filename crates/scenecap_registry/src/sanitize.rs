//! Name sanitizer shared by both registries.
//!
//! Maps free-text labels (device names, scene names) to identifiers made of
//! lowercase ASCII alphanumerics joined by single underscores. Every key in
//! either registry is derived through this module so the two files agree.

/// Convert a display label into a registry identifier.
///
/// Runs of anything that is not an ASCII letter or digit collapse into one
/// underscore; leading and trailing separators are dropped.
///
/// ```
/// use scenecap_registry::sanitize;
/// assert_eq!(sanitize("  Living Room -- Lamp! "), "living_room_lamp");
/// ```
pub fn sanitize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;

    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

/// Scene value as a key segment; negative values get an `m` prefix so the
/// sign survives sanitizing.
fn value_segment(value: i64) -> String {
    if value < 0 {
        format!("m{}", value.unsigned_abs())
    } else {
        value.to_string()
    }
}

/// Key of a scene table entry: `<scene name>_<value>`.
pub fn scene_key(scene_name: &str, value: i64) -> String {
    sanitize(&format!("{} {}", scene_name, value_segment(value)))
}

/// Key of a captured command: `<device name>_<scene name>_<value>`.
///
/// Repeated captures for the same device and scene map to the same key, so
/// the registry overwrites instead of duplicating.
pub fn command_key(device_name: &str, scene_name: &str, value: i64) -> String {
    sanitize(&format!("{} {} {}", device_name, scene_name, value_segment(value)))
}

/// Return `base` or the first `base_N` (N >= 2) accepted by `is_free`.
pub(crate) fn disambiguate(base: &str, mut is_free: impl FnMut(&str) -> bool) -> String {
    if is_free(base) {
        return base.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{}_{}", base, n);
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
