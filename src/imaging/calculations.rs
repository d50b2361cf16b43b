//! Pure calculation functions for crop geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate dimensions needed to cover a target box (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension matches the target exactly, the
/// other is floored and never falls below its target. Sizes past `u32::MAX`
/// saturate.
///
/// The cross-multiplied comparison decides which side drives the scale:
/// if `src_w * tgt_h > tgt_w * src_h` the source is relatively wider and
/// the height is matched; otherwise the width is matched.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target box dimensions (width, height)
///
/// # Returns
/// * `(width, height)` - Cover dimensions (each >= the target)
///
/// # Examples
/// ```
/// # use cropproxy::imaging::calculate_cover_dimensions;
/// // 400x300 source into a 200x100 box: width drives, height overflows
/// assert_eq!(calculate_cover_dimensions((400, 300), (200, 100)), (200, 150));
/// ```
pub fn calculate_cover_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = (u64::from(source.0), u64::from(source.1));
    let (tgt_w, tgt_h) = (u64::from(target.0), u64::from(target.1));

    if src_w * tgt_h > tgt_w * src_h {
        // Source is wider: height matches, width = floor(src_w * tgt_h / src_h)
        let w = src_w * tgt_h / src_h;
        (u32::try_from(w).unwrap_or(u32::MAX), target.1)
    } else {
        // Source is taller (or same aspect): width matches
        let h = src_h * tgt_w / src_w;
        (target.0, u32::try_from(h).unwrap_or(u32::MAX))
    }
}

/// Offset of a centered `target`-sized window inside `scaled`.
///
/// Odd margins are floored, so the extra pixel is dropped from the
/// bottom/right edge.
pub fn calculate_crop_offset(scaled: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        scaled.0.saturating_sub(target.0) / 2,
        scaled.1.saturating_sub(target.1) / 2,
    )
}

/// The centered region of `source` that a cover crop into `target` keeps.
///
/// This is the cover-scaled crop window mapped back to source pixels:
/// the window has the target's aspect ratio, spans the source's full
/// height (wider sources) or full width (taller sources), and its other
/// side is `ceil(tgt * src / tgt)` clamped to the source. Cropping this
/// window and then resizing it to `target` never builds an image larger
/// than either the source or the target.
///
/// # Returns
/// * `(x, y, width, height)` - Window in source coordinates
///
/// # Examples
/// ```
/// # use cropproxy::imaging::calculate_source_window;
/// // 400x300 into 200x100: keep a 400x200 band in the middle
/// assert_eq!(calculate_source_window((400, 300), (200, 100)), (0, 50, 400, 200));
/// ```
pub fn calculate_source_window(source: (u32, u32), target: (u32, u32)) -> (u32, u32, u32, u32) {
    let (src_w, src_h) = (u64::from(source.0), u64::from(source.1));
    let (tgt_w, tgt_h) = (u64::from(target.0.max(1)), u64::from(target.1.max(1)));

    let (w, h) = if src_w * tgt_h > tgt_w * src_h {
        ((tgt_w * src_h).div_ceil(tgt_h).clamp(1, src_w), src_h)
    } else {
        (src_w, (tgt_h * src_w).div_ceil(tgt_w).clamp(1, src_h))
    };
    // Both sides are clamped to the source, so they fit in u32.
    let window = (
        u32::try_from(w).unwrap_or(source.0),
        u32::try_from(h).unwrap_or(source.1),
    );
    let (x, y) = calculate_crop_offset(source, window);
    (x, y, window.0, window.1)
}
