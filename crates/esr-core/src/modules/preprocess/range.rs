use super::describe;
use crate::domain::{EsrError, EsrResult, FieldRange, Spectrum, indices_within};
use serde_json::json;

fn validate_bounds(operation: &'static str, field_min: f64, field_max: f64) -> EsrResult<()> {
    if !field_min.is_finite() || !field_max.is_finite() {
        return Err(EsrError::parameter(
            operation,
            format!("field bounds must be finite, got [{field_min}, {field_max}]"),
        ));
    }
    if field_min >= field_max {
        return Err(EsrError::parameter(
            operation,
            format!("field_min must be < field_max, got [{field_min}, {field_max}]"),
        ));
    }
    Ok(())
}

fn overlap(
    operation: &'static str,
    spectrum: &Spectrum,
    requested: FieldRange,
) -> EsrResult<FieldRange> {
    let trace = spectrum.field_range();
    requested.intersect(&trace).ok_or_else(|| {
        EsrError::range(
            operation,
            format!(
                "[{}, {}] T does not overlap the trace [{}, {}] T",
                requested.min_t, requested.max_t, trace.min_t, trace.max_t
            ),
        )
    })
}

/// Restrict the trace to `[field_min, field_max]` (inclusive). An existing
/// region of interest is intersected with the new bounds.
pub fn subset(spectrum: &Spectrum, field_min: f64, field_max: f64) -> EsrResult<Spectrum> {
    const OPERATION: &str = "subset";
    validate_bounds(OPERATION, field_min, field_max)?;
    let requested = overlap(OPERATION, spectrum, FieldRange::new(field_min, field_max))?;

    let indices = indices_within(spectrum.field(), requested);
    if indices.len() < 2 {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!(
                "[{field_min}, {field_max}] T keeps {} point(s), at least 2 are required",
                indices.len()
            ),
        ));
    }

    let region = match spectrum.region() {
        Some(region) => Some(region.intersect(&requested).ok_or_else(|| {
            EsrError::range(
                OPERATION,
                format!(
                    "region of interest [{}, {}] T lies outside the subset",
                    region.min_t, region.max_t
                ),
            )
        })?),
        None => None,
    };

    spectrum.derive(
        OPERATION,
        describe(&json!({ "field_min_t": field_min, "field_max_t": field_max })),
        spectrum.field()[indices.clone()].to_vec(),
        spectrum.signal()[indices].to_vec(),
        spectrum.domain_kind(),
        region,
    )
}

/// Mark `[field_min, field_max]` as the region of interest used by fitting
/// and integration. The trace itself is kept whole.
pub fn select_region(spectrum: &Spectrum, field_min: f64, field_max: f64) -> EsrResult<Spectrum> {
    const OPERATION: &str = "select_region";
    validate_bounds(OPERATION, field_min, field_max)?;
    let region = overlap(OPERATION, spectrum, FieldRange::new(field_min, field_max))?;

    let covered = indices_within(spectrum.field(), region).len();
    if covered < 2 {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!(
                "region [{field_min}, {field_max}] T covers {covered} point(s), at least 2 are required"
            ),
        ));
    }

    spectrum.derive(
        OPERATION,
        describe(&json!({ "field_min_t": field_min, "field_max_t": field_max })),
        spectrum.field().to_vec(),
        spectrum.signal().to_vec(),
        spectrum.domain_kind(),
        Some(region),
    )
}

#[cfg(test)]
mod tests {
    use super::{select_region, subset};
    use crate::domain::{EsrErrorKind, FieldRange, Spectrum, SpectrumMetadata};

    fn trace() -> Spectrum {
        let field: Vec<f64> = (0..11).map(|index| 0.33 + 0.001 * index as f64).collect();
        let signal: Vec<f64> = (0..11).map(|index| (index as f64).sin()).collect();
        Spectrum::derivative(field, signal, SpectrumMetadata::default()).expect("valid trace")
    }

    #[test]
    fn subset_keeps_inclusive_bounds() {
        let spectrum = trace();
        let restricted = subset(&spectrum, 0.3315, 0.3355).expect("subset");
        assert_eq!(restricted.len(), 4);
        assert_eq!(restricted.field()[0], spectrum.field()[2]);
        assert_eq!(restricted.signal()[3], spectrum.signal()[5]);
        assert_eq!(restricted.provenance().steps.len(), 1);
        assert_eq!(restricted.provenance().steps[0].operation, "subset");
    }

    #[test]
    fn subset_within_existing_range_is_idempotent() {
        let spectrum = trace();
        let once = subset(&spectrum, 0.3, 0.4).expect("subset");
        let twice = subset(&once, 0.3, 0.4).expect("subset");
        assert_eq!(once.field(), spectrum.field());
        assert_eq!(twice.signal(), spectrum.signal());
    }

    #[test]
    fn subset_rejects_invalid_requests() {
        let spectrum = trace();
        let cases = [
            (0.335, 0.332, EsrErrorKind::Parameter),
            (0.5, 0.6, EsrErrorKind::Range),
            (0.3325, 0.3334, EsrErrorKind::InsufficientData),
        ];
        for (low, high, kind) in cases {
            let error = subset(&spectrum, low, high).expect_err("request must fail");
            assert_eq!(error.kind(), kind, "[{low}, {high}]");
        }
    }

    #[test]
    fn subset_intersects_the_region_of_interest() {
        let spectrum = select_region(&trace(), 0.333, 0.338).expect("region");
        let restricted = subset(&spectrum, 0.331, 0.336).expect("subset");
        assert_eq!(restricted.region(), Some(FieldRange::new(0.333, 0.336)));
    }

    #[test]
    fn region_keeps_the_trace_and_limits_active_points() {
        let spectrum = select_region(&trace(), 0.3325, 0.3355).expect("region");
        assert_eq!(spectrum.len(), 11);
        assert_eq!(spectrum.active_field().len(), 3);
        let error = select_region(&trace(), 0.2, 0.3).expect_err("outside");
        assert_eq!(error.kind(), EsrErrorKind::Range);
    }
}
