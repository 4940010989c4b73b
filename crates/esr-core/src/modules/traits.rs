use crate::domain::{EsrResult, Spectrum};

/// A pure spectrum-to-spectrum operation with its parameters bound.
pub trait SpectrumTransform {
    fn apply(&self, spectrum: &Spectrum) -> EsrResult<Spectrum>;
}

/// Sequences apply element by element, each step consuming the previous
/// output. An empty sequence returns a copy of the input.
impl<T> SpectrumTransform for [T]
where
    T: SpectrumTransform,
{
    fn apply(&self, spectrum: &Spectrum) -> EsrResult<Spectrum> {
        let mut current = spectrum.clone();
        for step in self {
            current = step.apply(&current)?;
        }
        Ok(current)
    }
}
