pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;

pub use domain::{
    DomainKind, EsrError, EsrErrorKind, EsrResult, FieldRange, FitFailureReason,
    ProcessingRecord, Provenance, Spectrum, SpectrumMetadata,
};
