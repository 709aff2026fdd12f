//! Pre-passes that undo alpha artifacts left by image post-processing.
//!
//! Both passes work on a plane holding one byte per pixel (the occupancy
//! channel) and only ever lower values to zero.

/// Copy one channel out of an RGBA buffer.
pub fn extract_channel(rgba: &[u8], channel: usize) -> Vec<u8> {
    rgba.chunks_exact(4).map(|px| px[channel]).collect()
}

/// Zero every data pixel whose three remaining channels are all
/// `<= unshadow_threshold`.
///
/// The remaining channels are found by rotating from `channel`, so with the
/// alpha channel they are R, G and B.
pub fn shadow_recovery(
    plane: &mut [u8],
    rgba: &[u8],
    channel: usize,
    threshold: u8,
    unshadow_threshold: u8,
) {
    for (value, px) in plane.iter_mut().zip(rgba.chunks_exact(4)) {
        if *value < threshold {
            continue;
        }
        if (1..4).all(|k| px[(channel + k) % 4] <= unshadow_threshold) {
            *value = 0;
        }
    }
}

/// Stroke passes in their fixed order: diagonal, horizontal, vertical.
const STROKE_DIRECTIONS: [(usize, usize); 3] = [(1, 1), (1, 0), (0, 1)];

/// Undo a one-pixel smoothing fill that bled data towards +x/+y.
///
/// Along each direction a pixel is cleared when it and its predecessor are
/// data and its successor is not. Every pass reads the plane as it was before
/// the first pass; clears accumulate in `plane`. Pixels whose predecessor or
/// successor falls outside the tile are left alone.
pub fn stroke_recovery(plane: &mut [u8], width: usize, height: usize, threshold: u8) {
    let snapshot = plane.to_vec();
    let is_data = |x: usize, y: usize| snapshot[y * width + x] >= threshold;

    for (dx, dy) in STROKE_DIRECTIONS {
        if width <= 2 * dx || height <= 2 * dy {
            continue;
        }
        for y in dy..height - dy {
            for x in dx..width - dx {
                if is_data(x, y) && is_data(x - dx, y - dy) && !is_data(x + dx, y + dy) {
                    plane[y * width + x] = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_channel, shadow_recovery, stroke_recovery};

    fn plane_from(rows: &[&str]) -> (Vec<u8>, usize, usize) {
        let h = rows.len();
        let w = rows[0].len();
        let plane = rows
            .iter()
            .flat_map(|r| r.bytes().map(|b| if b == b'#' { 255 } else { 0 }))
            .collect();
        (plane, w, h)
    }

    fn render(plane: &[u8], w: usize) -> Vec<String> {
        plane
            .chunks(w)
            .map(|row| row.iter().map(|&v| if v > 0 { '#' } else { '.' }).collect())
            .collect()
    }

    #[test]
    fn extracts_requested_channel() {
        let rgba = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(extract_channel(&rgba, 3), vec![4, 8]);
        assert_eq!(extract_channel(&rgba, 0), vec![1, 5]);
    }

    #[test]
    fn shadow_pixels_become_nodata() {
        // opaque black, opaque white, opaque near-black, transparent
        let rgba = [
            0, 0, 0, 255, //
            255, 255, 255, 255, //
            4, 8, 2, 200, //
            0, 0, 0, 0,
        ];
        let mut plane = extract_channel(&rgba, 3);
        shadow_recovery(&mut plane, &rgba, 3, 1, 8);
        assert_eq!(plane, vec![0, 255, 0, 0]);
    }

    #[test]
    fn shadow_rotation_follows_channel() {
        // Occupancy in channel 0; the "other" channels are 1, 2, 3.
        let rgba = [200, 0, 0, 0, 200, 0, 0, 90];
        let mut plane = extract_channel(&rgba, 0);
        shadow_recovery(&mut plane, &rgba, 0, 1, 8);
        assert_eq!(plane, vec![0, 200]);
    }

    #[test]
    fn stroke_undoes_two_by_two_fill() {
        let (mut plane, w, h) = plane_from(&[
            "......", //
            "..##..", //
            "..##..", //
            "......", //
            "......",
        ]);
        stroke_recovery(&mut plane, w, h, 1);
        assert_eq!(
            render(&plane, w),
            vec!["......", "..#...", "......", "......", "......"]
        );
    }

    #[test]
    fn stroke_leaves_isolated_pixels() {
        let (mut plane, w, h) = plane_from(&["....", ".#..", "....", "...#"]);
        let before = plane.clone();
        stroke_recovery(&mut plane, w, h, 1);
        assert_eq!(plane, before);
    }

    #[test]
    fn stroke_ignores_tile_border() {
        // Pair touching the right edge: successor is outside, nothing cleared.
        let (mut plane, w, h) = plane_from(&["....", "..##", "...."]);
        stroke_recovery(&mut plane, w, h, 1);
        assert_eq!(render(&plane, w), vec!["....", "..##", "...."]);
    }
}
