pub mod errors;

pub use errors::{EsrError, EsrErrorKind, EsrResult, FitFailureReason};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::Range;

/// Which quantity the signal axis carries. Conversions between the two are
/// explicit preprocessing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainKind {
    Derivative,
    Absorption,
}

impl DomainKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Derivative => "derivative",
            Self::Absorption => "absorption",
        }
    }
}

impl Display for DomainKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Acquisition metadata in canonical SI units. Every entry is optional;
/// computations that need one go through the `require_*` accessors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumMetadata {
    pub frequency_hz: Option<f64>,
    pub modulation_amplitude_t: Option<f64>,
    pub microwave_power_w: Option<f64>,
    pub temperature_k: Option<f64>,
    pub phase_rad: Option<f64>,
    pub instrument: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub raw_header: BTreeMap<String, String>,
}

impl SpectrumMetadata {
    pub fn with_frequency_hz(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = Some(frequency_hz);
        self
    }

    pub fn require_frequency_hz(&self, operation: &'static str) -> EsrResult<f64> {
        let frequency = self
            .frequency_hz
            .ok_or_else(|| EsrError::missing_metadata(operation, "frequency_hz"))?;
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(EsrError::parameter(
                operation,
                format!("frequency_hz must be finite and > 0, got {frequency}"),
            ));
        }
        Ok(frequency)
    }
}

/// Closed field interval in tesla.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub min_t: f64,
    pub max_t: f64,
}

impl FieldRange {
    pub const fn new(min_t: f64, max_t: f64) -> Self {
        Self { min_t, max_t }
    }

    pub fn span(&self) -> f64 {
        self.max_t - self.min_t
    }

    pub fn contains(&self, field_t: f64) -> bool {
        field_t >= self.min_t && field_t <= self.max_t
    }

    pub fn intersect(&self, other: &FieldRange) -> Option<FieldRange> {
        let min_t = self.min_t.max(other.min_t);
        let max_t = self.max_t.min(other.max_t);
        (min_t <= max_t).then_some(FieldRange { min_t, max_t })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub operation: String,
    pub parameters: String,
}

impl ProcessingRecord {
    pub fn new(operation: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            parameters: parameters.into(),
        }
    }
}

/// Lineage from the loaded trace to a derived spectrum.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: Option<String>,
    pub steps: Vec<ProcessingRecord>,
}

/// One acquired or derived ESR trace. Immutable after construction; every
/// transform builds a new value whose provenance extends this one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    field: Vec<f64>,
    signal: Vec<f64>,
    domain_kind: DomainKind,
    metadata: SpectrumMetadata,
    region: Option<FieldRange>,
    provenance: Provenance,
}

impl Spectrum {
    pub fn new(
        field: Vec<f64>,
        signal: Vec<f64>,
        domain_kind: DomainKind,
        metadata: SpectrumMetadata,
    ) -> EsrResult<Self> {
        validate_axes("spectrum", &field, &signal)?;
        Ok(Self {
            field,
            signal,
            domain_kind,
            metadata,
            region: None,
            provenance: Provenance::default(),
        })
    }

    pub fn derivative(
        field: Vec<f64>,
        signal: Vec<f64>,
        metadata: SpectrumMetadata,
    ) -> EsrResult<Self> {
        Self::new(field, signal, DomainKind::Derivative, metadata)
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.provenance.source_id = Some(source_id.into());
        self
    }

    pub fn field(&self) -> &[f64] {
        &self.field
    }

    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    pub fn len(&self) -> usize {
        self.field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field.is_empty()
    }

    pub fn domain_kind(&self) -> DomainKind {
        self.domain_kind
    }

    pub fn metadata(&self) -> &SpectrumMetadata {
        &self.metadata
    }

    pub fn region(&self) -> Option<FieldRange> {
        self.region
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn field_range(&self) -> FieldRange {
        FieldRange::new(self.field[0], self.field[self.field.len() - 1])
    }

    /// Smallest spacing between adjacent field points.
    pub fn min_field_step(&self) -> f64 {
        self.field
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(f64::INFINITY, f64::min)
    }

    /// Index range covered by the region of interest, or the whole trace.
    pub fn active_indices(&self) -> Range<usize> {
        match self.region {
            Some(region) => indices_within(&self.field, region),
            None => 0..self.field.len(),
        }
    }

    pub fn active_field(&self) -> &[f64] {
        &self.field[self.active_indices()]
    }

    pub fn active_signal(&self) -> &[f64] {
        &self.signal[self.active_indices()]
    }

    /// Mask of points outside the region of interest. Without a region every
    /// point counts as outside.
    pub fn outside_region_mask(&self) -> Vec<bool> {
        match self.region {
            Some(region) => self
                .field
                .iter()
                .map(|value| !region.contains(*value))
                .collect(),
            None => vec![true; self.field.len()],
        }
    }

    pub(crate) fn derive_signal(
        &self,
        operation: &'static str,
        parameters: impl Into<String>,
        signal: Vec<f64>,
        domain_kind: DomainKind,
    ) -> EsrResult<Spectrum> {
        self.derive(
            operation,
            parameters,
            self.field.clone(),
            signal,
            domain_kind,
            self.region,
        )
    }

    pub(crate) fn derive(
        &self,
        operation: &'static str,
        parameters: impl Into<String>,
        field: Vec<f64>,
        signal: Vec<f64>,
        domain_kind: DomainKind,
        region: Option<FieldRange>,
    ) -> EsrResult<Spectrum> {
        validate_axes(operation, &field, &signal)?;
        let mut provenance = self.provenance.clone();
        provenance.steps.push(ProcessingRecord::new(operation, parameters));
        Ok(Spectrum {
            field,
            signal,
            domain_kind,
            metadata: self.metadata.clone(),
            region,
            provenance,
        })
    }

    pub(crate) fn with_metadata(mut self, metadata: SpectrumMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Indices whose field lies inside `region`; empty when nothing does.
pub(crate) fn indices_within(field: &[f64], region: FieldRange) -> Range<usize> {
    let start = field.partition_point(|value| *value < region.min_t);
    let end = field.partition_point(|value| *value <= region.max_t);
    start..end.max(start)
}

fn validate_axes(operation: &'static str, field: &[f64], signal: &[f64]) -> EsrResult<()> {
    if field.len() != signal.len() {
        return Err(EsrError::parameter(
            operation,
            format!(
                "field and signal lengths differ: field={}, signal={}",
                field.len(),
                signal.len()
            ),
        ));
    }
    if field.len() < 2 {
        return Err(EsrError::insufficient_data(
            operation,
            format!("a spectrum needs at least 2 points, got {}", field.len()),
        ));
    }

    for (index, value) in field.iter().copied().enumerate() {
        if !value.is_finite() {
            return Err(EsrError::parameter(
                operation,
                format!("field must be finite at index {index}, got {value}"),
            ));
        }
        if index > 0 && value <= field[index - 1] {
            return Err(EsrError::parameter(
                operation,
                format!(
                    "field must be strictly increasing, index {index} has {value} after {}",
                    field[index - 1]
                ),
            ));
        }
    }

    if let Some(index) = signal.iter().position(|value| !value.is_finite()) {
        return Err(EsrError::parameter(
            operation,
            format!("signal must be finite at index {index}, got {}", signal[index]),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DomainKind, EsrErrorKind, FieldRange, Spectrum, SpectrumMetadata};

    fn ramp(count: usize) -> Spectrum {
        let field = (0..count).map(|index| 0.33 + 1.0e-4 * index as f64).collect();
        let signal = (0..count).map(|index| index as f64).collect();
        Spectrum::derivative(field, signal, SpectrumMetadata::default()).expect("valid spectrum")
    }

    #[test]
    fn construction_rejects_length_mismatch() {
        let error = Spectrum::derivative(vec![0.1, 0.2], vec![1.0], SpectrumMetadata::default())
            .expect_err("mismatch should fail");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
    }

    #[test]
    fn construction_rejects_single_point() {
        let error = Spectrum::derivative(vec![0.1], vec![1.0], SpectrumMetadata::default())
            .expect_err("single point should fail");
        assert_eq!(error.kind(), EsrErrorKind::InsufficientData);
    }

    #[test]
    fn construction_rejects_non_monotonic_and_non_finite_field() {
        for field in [vec![0.1, 0.1, 0.2], vec![0.3, 0.2, 0.1], vec![0.1, f64::NAN, 0.3]] {
            let error = Spectrum::derivative(field, vec![0.0; 3], SpectrumMetadata::default())
                .expect_err("invalid field should fail");
            assert_eq!(error.kind(), EsrErrorKind::Parameter);
        }
    }

    #[test]
    fn construction_rejects_non_finite_signal() {
        let error = Spectrum::derivative(
            vec![0.1, 0.2],
            vec![1.0, f64::INFINITY],
            SpectrumMetadata::default(),
        )
        .expect_err("non-finite signal should fail");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
    }

    #[test]
    fn active_indices_follow_region() {
        let spectrum = ramp(11);
        assert_eq!(spectrum.active_indices(), 0..11);

        let derived = spectrum
            .derive(
                "select_region",
                "test",
                spectrum.field().to_vec(),
                spectrum.signal().to_vec(),
                DomainKind::Derivative,
                Some(FieldRange::new(0.3302, 0.3305)),
            )
            .expect("derived");
        assert_eq!(derived.active_indices(), 2..6);
        assert_eq!(derived.active_signal(), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(derived.provenance().steps.len(), 1);
        assert!(spectrum.provenance().steps.is_empty());
        assert_eq!(
            derived.outside_region_mask().iter().filter(|outside| **outside).count(),
            7
        );
    }

    #[test]
    fn missing_frequency_fails_loudly() {
        let metadata = SpectrumMetadata::default();
        let error = metadata
            .require_frequency_hz("g_factor")
            .expect_err("missing frequency should fail");
        assert_eq!(error.kind(), EsrErrorKind::MissingMetadata);

        let metadata = SpectrumMetadata::default().with_frequency_hz(9.5e9);
        assert_eq!(metadata.require_frequency_hz("g_factor").expect("frequency"), 9.5e9);
    }

    #[test]
    fn field_range_intersection() {
        let lhs = FieldRange::new(0.0, 1.0);
        assert_eq!(
            lhs.intersect(&FieldRange::new(0.5, 2.0)),
            Some(FieldRange::new(0.5, 1.0))
        );
        assert_eq!(lhs.intersect(&FieldRange::new(1.5, 2.0)), None);
    }
}
