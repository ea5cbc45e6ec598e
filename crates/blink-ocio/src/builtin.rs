//! Built-in configuration.
//!
//! [`nuke_default`] mirrors the compositing-oriented default shipped with
//! most compositors: a scene-linear reference, Cineon log for
//! `compositing_log`, a handful of display encodings and a raw data space.
//!
//! ```
//! use blink_ocio::builtin;
//!
//! let config = builtin::nuke_default();
//! assert_eq!(config.colorspace("compositing_log").unwrap().name(), "Cineon");
//! ```

use crate::colorspace::{ColorSpace, Encoding};
use crate::config::Config;
use crate::role::names;
use crate::transform::*;

/// Cineon code value of reference black (out of 1023).
pub const CINEON_BLACK: f64 = 95.0;
/// Cineon code value of reference white (out of 1023).
pub const CINEON_WHITE: f64 = 685.0;
/// Cineon density step per code value (0.002 density, 0.6 negative gamma).
pub const CINEON_CODES_PER_DECADE: f64 = 300.0;

/// Creates the built-in nuke-default style configuration.
pub fn nuke_default() -> Config {
    let mut config = Config::new();
    config.set_name("nuke-default (built-in)");

    config.add_colorspace(linear());
    config.add_colorspace(cineon());
    config.add_colorspace(srgb());
    config.add_colorspace(rec709());
    config.add_colorspace(gamma22());
    config.add_colorspace(log2());
    config.add_colorspace(xyz());
    config.add_colorspace(raw());

    config.set_role(names::REFERENCE, "linear");
    config.set_role(names::SCENE_LINEAR, "linear");
    config.set_role(names::COMPOSITING_LOG, "Cineon");
    config.set_role(names::COLOR_PICKING, "sRGB");
    config.set_role(names::DATA, "raw");
    config.set_role(names::DEFAULT, "raw");

    config
}

/// Cineon log to linear, as a log-affine transform on the linear side.
///
/// Reference black (95) maps to 0 and reference white (685) to 1.
pub fn cineon_log_affine() -> LogAffineTransform {
    let black = 10f64.powf((CINEON_BLACK - CINEON_WHITE) / CINEON_CODES_PER_DECADE);
    LogAffineTransform {
        base: 10.0,
        log_side_slope: [CINEON_CODES_PER_DECADE / 1023.0; 3],
        log_side_offset: [CINEON_WHITE / 1023.0; 3],
        lin_side_slope: [1.0 - black; 3],
        lin_side_offset: [black; 3],
        direction: TransformDirection::Forward,
    }
}

fn linear() -> ColorSpace {
    ColorSpace::builder("linear")
        .alias("scene-linear")
        .encoding(Encoding::SceneLinear)
        .description("Scene-linear reference space")
        .build()
}

fn cineon() -> ColorSpace {
    ColorSpace::builder("Cineon")
        .alias("lg10")
        .family("log")
        .encoding(Encoding::Log)
        .description("Cineon 10-bit printing density log")
        .to_reference(Transform::LogAffine(cineon_log_affine()).inverse())
        .build()
}

fn exponent_with_linear(gamma: f64, offset: f64) -> Transform {
    Transform::ExponentWithLinear(ExponentWithLinearTransform {
        gamma: [gamma, gamma, gamma, 1.0],
        offset: [offset, offset, offset, 0.0],
        direction: TransformDirection::Forward,
    })
}

fn srgb() -> ColorSpace {
    ColorSpace::builder("sRGB")
        .family("display")
        .encoding(Encoding::SdrVideo)
        .description("sRGB IEC 61966-2-1 encoding")
        .to_reference(exponent_with_linear(2.4, 0.055))
        .build()
}

fn rec709() -> ColorSpace {
    ColorSpace::builder("rec709")
        .family("display")
        .encoding(Encoding::SdrVideo)
        .description("Rec. ITU-R BT.709 camera encoding")
        .to_reference(exponent_with_linear(1.0 / 0.45, 0.099))
        .build()
}

fn gamma22() -> ColorSpace {
    ColorSpace::builder("Gamma2.2")
        .family("display")
        .encoding(Encoding::SdrVideo)
        .to_reference(Transform::Exponent(ExponentTransform {
            value: [2.2, 2.2, 2.2, 1.0],
            negative_style: NegativeStyle::Mirror,
            direction: TransformDirection::Forward,
        }))
        .build()
}

fn log2() -> ColorSpace {
    // [0, 1] spans -10 to +6.5 stops around 1.0.
    ColorSpace::builder("Log2")
        .family("log")
        .encoding(Encoding::Log)
        .description("Log2 shaper, 16.5 stops")
        .to_reference(Transform::group(vec![
            Transform::Range(RangeTransform {
                min_in: Some(0.0),
                max_in: Some(1.0),
                min_out: Some(-10.0),
                max_out: Some(6.5),
                style: RangeStyle::NoClamp,
                direction: TransformDirection::Forward,
            }),
            Transform::Log(LogTransform {
                base: 2.0,
                direction: TransformDirection::Inverse,
            }),
        ]))
        .build()
}

fn xyz() -> ColorSpace {
    // Linear CIE XYZ (D65) to linear Rec.709 primaries.
    #[rustfmt::skip]
    let xyz_to_rec709 = [
         3.240_454_2, -1.537_138_5, -0.498_531_4, 0.0,
        -0.969_266_0,  1.876_010_8,  0.041_556_0, 0.0,
         0.055_643_4, -0.204_025_9,  1.057_225_2, 0.0,
         0.0,          0.0,          0.0,         1.0,
    ];
    ColorSpace::builder("XYZ")
        .family("utility")
        .encoding(Encoding::SceneLinear)
        .description("CIE XYZ, D65 white")
        .to_reference(Transform::matrix(xyz_to_rec709))
        .build()
}

fn raw() -> ColorSpace {
    ColorSpace::builder("raw")
        .family("utility")
        .encoding(Encoding::Data)
        .is_data(true)
        .description("Non-color data, never transformed")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn roles_resolve() {
        let config = nuke_default();
        config.validate().unwrap();
        assert_eq!(config.colorspace(names::SCENE_LINEAR).unwrap().name(), "linear");
        assert_eq!(config.colorspace(names::COMPOSITING_LOG).unwrap().name(), "Cineon");
        assert!(config.colorspace(names::DATA).unwrap().is_data());
    }

    #[test]
    fn cineon_white_and_black() {
        let config = nuke_default();
        let p = config.processor("Cineon", "linear").unwrap();

        let mut white = [685.0 / 1023.0; 3];
        p.apply_rgb(&mut white);
        assert_relative_eq!(white[0], 1.0, epsilon = 1e-5);

        let mut black = [95.0 / 1023.0; 3];
        p.apply_rgb(&mut black);
        assert_relative_eq!(black[0], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn distinct_color_spaces_are_not_noops() {
        let config = nuke_default();
        let names: Vec<_> = config
            .colorspaces()
            .iter()
            .filter(|cs| !cs.is_data())
            .map(|cs| cs.name().to_string())
            .collect();
        for src in &names {
            for dst in &names {
                let p = config.processor(src, dst).unwrap();
                assert_eq!(p.is_no_op(), src == dst, "{src} -> {dst}");
            }
        }
    }

    #[test]
    fn log2_midpoint() {
        let config = nuke_default();
        let p = config.processor("Log2", "linear").unwrap();
        // 10 / 16.5 of the way up is 0 stops.
        let mut rgb = [10.0 / 16.5; 3];
        p.apply_rgb(&mut rgb);
        assert_relative_eq!(rgb[0], 1.0, epsilon = 1e-5);
    }
}
