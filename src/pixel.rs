//! Mapping between timestamps and pixel columns of a visible time range.
//!
//! Range queries use these helpers to return at most one timer per pixel
//! column: after emitting a timer the caller jumps straight to the first timer
//! starting at or after [`next_pixel_boundary`] of its end.
//!
//! Intermediates are computed in 128 bits, so `pixel_count * (end_ns - start_ns)`
//! never overflows. Results that do not fit in 64 bits saturate.

/// Pixel column of `t` within `[start_ns, end_ns)` split into `pixel_count` columns.
///
/// Timestamps before `start_ns` map to column 0. Degenerate ranges
/// (`end_ns <= start_ns` or `pixel_count == 0`) map everything to column 0.
pub fn get_pixel(t: u64, pixel_count: u64, start_ns: u64, end_ns: u64) -> u64 {
    if end_ns <= start_ns || pixel_count == 0 {
        return 0;
    }
    let offset = u128::from(t.saturating_sub(start_ns));
    let width = u128::from(end_ns - start_ns);
    let pixel = offset * u128::from(pixel_count) / width;
    u64::try_from(pixel).unwrap_or(u64::MAX)
}

/// First timestamp that falls into the pixel column after the one containing `t`.
///
/// For a degenerate range this is `end_ns + 1`, which is past any timer that
/// can intersect the range.
pub fn next_pixel_boundary(t: u64, pixel_count: u64, start_ns: u64, end_ns: u64) -> u64 {
    if end_ns <= start_ns || pixel_count == 0 {
        return end_ns.saturating_add(1);
    }
    let next_pixel = u128::from(get_pixel(t, pixel_count, start_ns, end_ns)) + 1;
    let width = u128::from(end_ns - start_ns);
    let pixels = u128::from(pixel_count);
    let offset = (next_pixel * width).div_ceil(pixels);
    let boundary = u128::from(start_ns) + offset;
    u64::try_from(boundary).unwrap_or(u64::MAX)
}
