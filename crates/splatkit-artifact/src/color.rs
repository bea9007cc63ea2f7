//! Degree-0 spherical harmonic color and opacity activation.

/// Zeroth-order SH basis constant, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f32 = 0.282_094_8;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Linear RGBA in `[0, 1]` from DC coefficients and a logit opacity.
pub fn sh_to_rgba(f_dc: [f32; 3], opacity: f32) -> [f32; 4] {
    let c = |v: f32| (0.5 + SH_C0 * v).clamp(0.0, 1.0);
    [c(f_dc[0]), c(f_dc[1]), c(f_dc[2]), sigmoid(opacity)]
}

/// 8-bit RGBA; values are scaled by 255 and truncated.
pub fn to_rgba8(f_dc: [f32; 3], opacity: f32) -> [u8; 4] {
    let byte = |v: f32| (v * 255.0).clamp(0.0, 255.0) as u8;
    let [r, g, b, a] = sh_to_rgba(f_dc, opacity);
    [byte(r), byte(g), byte(b), byte(a)]
}
