//! Data, not logic: the TLS-goroutine offset table and the small set of
//! constants the safety filter and controller defaults need. Extending
//! this for a new runtime release is meant to be a one-line addition —
//! see spec Design Note open question 1 (the exact version boundary is
//! baked in here and nowhere else).

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Os {
    Linux,
    Darwin,
}

/// Runtime version, as read from the binary's embedded version string
/// (e.g. parsed out of `runtime.buildVersion`). Only the (major, minor)
/// pair matters for the TLS offset boundary.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        RuntimeVersion { major, minor }
    }
}

/// The version at and after which the TLS base holds the goroutine
/// pointer at the "new" offset rather than the "old" one.
const TLS_OFFSET_BOUNDARY: RuntimeVersion = RuntimeVersion::new(1, 17);

const LINUX_TLS_OFFSET_OLD: i64 = -8;
const LINUX_TLS_OFFSET_NEW: i64 = 0x30;
const DARWIN_TLS_OFFSET_OLD: i64 = 0x8a0;
const DARWIN_TLS_OFFSET_NEW: i64 = 0x30;

/// Returns the FS-base (Linux) / GS-base (Darwin) relative offset at
/// which the current goroutine pointer lives, selected by OS and the
/// target's runtime version.
pub fn tls_offset(os: Os, version: RuntimeVersion) -> i64 {
    let is_new = version >= TLS_OFFSET_BOUNDARY;
    match (os, is_new) {
        (Os::Linux, false) => LINUX_TLS_OFFSET_OLD,
        (Os::Linux, true) => LINUX_TLS_OFFSET_NEW,
        (Os::Darwin, false) => DARWIN_TLS_OFFSET_OLD,
        (Os::Darwin, true) => DARWIN_TLS_OFFSET_NEW,
    }
}

/// Symbol-name prefix the safety filter excludes from automatic
/// breakpoint installation: unexported runtime-package functions.
pub const RUNTIME_INTERNAL_PREFIX: &str = "runtime.";

/// The one runtime-internal symbol that must still be trapped to keep
/// the shadow stack correct across a panic.
pub const PANIC_THROW_SYMBOL: &str = "runtime.gopanic";

/// Symbol substrings that mark build-id or type-hash helpers, excluded
/// from automatic breakpoint installation even though they don't carry
/// the runtime-internal prefix.
pub const NON_FUNCTION_SYMBOL_MARKERS: &[&str] = &[".typehash.", "go.buildid", "go:buildid"];

pub const DEFAULT_TRACE_LEVEL: u32 = 1;
pub const DEFAULT_PARSE_LEVEL: u32 = 1;

/// Capacity of the bounded channels backing `add_start_trace_point`,
/// `add_end_trace_point` and `interrupt` (spec §5: large enough to
/// absorb bursts without losing requests).
pub const CONTROL_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_runtime_uses_old_offsets() {
        let v = RuntimeVersion::new(1, 16);
        assert_eq!(tls_offset(Os::Linux, v), LINUX_TLS_OFFSET_OLD);
        assert_eq!(tls_offset(Os::Darwin, v), DARWIN_TLS_OFFSET_OLD);
    }

    #[test]
    fn new_runtime_uses_new_offsets() {
        let v = RuntimeVersion::new(1, 20);
        assert_eq!(tls_offset(Os::Linux, v), LINUX_TLS_OFFSET_NEW);
        assert_eq!(tls_offset(Os::Darwin, v), DARWIN_TLS_OFFSET_NEW);
    }

    #[test]
    fn boundary_version_counts_as_new() {
        assert_eq!(
            tls_offset(Os::Linux, TLS_OFFSET_BOUNDARY),
            LINUX_TLS_OFFSET_NEW
        );
    }
}
