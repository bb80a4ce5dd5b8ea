//! Processing-unit cost calculator (spec.md §4.5).
//!
//! Pure function from request shape to a PU weight; every constant here
//! is load-bearing and must match the upstream's published formula
//! bit-for-bit (see the test module for the reference values).

use crate::policy::OutputFormat;

/// Compute the processing-unit cost of a single request.
///
/// ```
/// use rlguard_core::pu::calculate_processing_units;
/// use rlguard_core::OutputFormat;
///
/// let pu = calculate_processing_units(false, 512, 512, 3, OutputFormat::Other, 1, false);
/// assert_eq!(pu, 1.0);
/// ```
pub fn calculate_processing_units(
    batch_processing: bool,
    width: u32,
    height: u32,
    n_input_bands_without_datamask: u32,
    output_format: OutputFormat,
    n_data_samples: u32,
    // Accepted for forward compatibility; the upstream does not currently
    // apply this multiplier (see DESIGN.md open question).
    _s1_orthorectification: bool,
) -> f64 {
    let mut pu = 1.0;

    // Batch processing API: three times more data per PU.
    if batch_processing {
        pu /= 3.0;
    }

    // Output size relative to the 512x512 reference tile, floored at an
    // area corresponding to 0.25 km^2 of 10m Sentinel-2 data.
    pu *= ((width as f64 * height as f64) / (512.0 * 512.0)).max(0.01);

    // Input bands, excluding the free dataMask band.
    pu *= n_input_bands_without_datamask as f64 / 3.0;

    // 32-bit float TIFF costs double for memory/traffic; octet-stream
    // costs 1.4x for external-tool integration overhead.
    match output_format {
        OutputFormat::Tiff32 => pu *= 2.0,
        OutputFormat::OctetStream => pu *= 1.4,
        OutputFormat::Other => {}
    }

    pu *= n_data_samples as f64;

    pu.max(0.001)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_request_costs_one_pu() {
        assert_eq!(
            calculate_processing_units(false, 512, 512, 3, OutputFormat::Other, 1, false),
            1.0
        );
    }

    #[test]
    fn batch_processing_divides_by_three() {
        let pu = calculate_processing_units(true, 512, 512, 3, OutputFormat::Other, 1, false);
        assert!((pu - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn larger_output_scales_quadratically_with_area() {
        assert_eq!(
            calculate_processing_units(false, 1024, 1024, 3, OutputFormat::Other, 1, false),
            4.0
        );
    }

    #[test]
    fn tiff32_doubles_the_cost() {
        assert_eq!(
            calculate_processing_units(false, 1024, 1024, 3, OutputFormat::Tiff32, 1, false),
            8.0
        );
    }

    #[test]
    fn octet_stream_multiplies_by_1_4() {
        let pu = calculate_processing_units(false, 512, 512, 3, OutputFormat::OctetStream, 1, false);
        assert!((pu - 1.4).abs() < 1e-12);
    }

    #[test]
    fn tiny_output_area_is_clamped_to_minimum() {
        assert_eq!(
            calculate_processing_units(false, 10, 10, 3, OutputFormat::Other, 1, false),
            0.01
        );
    }

    #[test]
    fn degenerate_request_hits_the_final_floor() {
        assert_eq!(
            calculate_processing_units(false, 1, 1, 0, OutputFormat::Other, 1, false),
            0.001
        );
    }

    #[test]
    fn s1_orthorectification_is_currently_inert() {
        let with_flag = calculate_processing_units(false, 512, 512, 3, OutputFormat::Other, 1, true);
        let without_flag = calculate_processing_units(false, 512, 512, 3, OutputFormat::Other, 1, false);
        assert_eq!(with_flag, without_flag);
    }

    #[test]
    fn multiple_data_samples_scale_linearly() {
        let pu = calculate_processing_units(false, 512, 512, 3, OutputFormat::Other, 4, false);
        assert_eq!(pu, 4.0);
    }
}
