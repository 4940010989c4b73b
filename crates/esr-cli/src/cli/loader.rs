use super::CliError;
use anyhow::{Context, anyhow};
use csv::ReaderBuilder;
use esr_core::common::units::{FieldUnit, ghz_to_hz, gauss_to_t, mt_to_t, mw_to_w};
use esr_core::{Spectrum, SpectrumMetadata};
use std::fs;
use std::path::Path;

/// Reads a two-column (field, signal) text trace. Leading `key: value` or
/// `key = value` lines, with or without `#`, fill the metadata; a
/// non-numeric row before the data names the columns and sets the field unit.
pub(super) fn load_spectrum(path: &Path) -> Result<Spectrum, CliError> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read spectrum '{}'", path.display()))?;
    parse_spectrum_text(&text, &path.display().to_string())
}

pub(super) fn parse_spectrum_text(text: &str, source: &str) -> Result<Spectrum, CliError> {
    let mut metadata = SpectrumMetadata::default();
    let mut field_unit: Option<FieldUnit> = None;
    let mut data_start = text.len();

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let is_comment = trimmed.starts_with('#');
        let content = trimmed.trim_start_matches('#').trim();

        if content.is_empty() {
            offset += line.len();
            continue;
        }
        if let Some((key, value)) = split_header_line(content) {
            apply_header(&mut metadata, &mut field_unit, key, value)
                .with_context(|| format!("invalid header line '{content}' in '{source}'"))?;
            offset += line.len();
            continue;
        }
        if is_comment {
            offset += line.len();
            continue;
        }
        let fields = split_fields(content);
        if fields.len() >= 2 && fields[0].parse::<f64>().is_ok() {
            data_start = offset;
            break;
        }
        // Column header row.
        if field_unit.is_none() {
            field_unit = fields.first().map(|first| FieldUnit::from_header(first));
        }
        offset += line.len();
    }

    let data = &text[data_start..];
    let first_line = data.lines().next().unwrap_or_default();
    let mut reader = ReaderBuilder::new()
        .delimiter(detect_delimiter(first_line))
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let unit = field_unit.unwrap_or(FieldUnit::Tesla);
    let mut field = Vec::new();
    let mut signal = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed data row in '{source}'"))?;
        let values: Vec<&str> = record.iter().filter(|value| !value.is_empty()).collect();
        if values.is_empty() {
            continue;
        }
        if values.len() < 2 {
            let message = format!("data row {} of '{source}' has fewer than two columns", row + 1);
            return Err(anyhow!(message).into());
        }
        let parse = |value: &str| {
            value.parse::<f64>().with_context(|| {
                format!("data row {} of '{source}' has non-numeric value '{value}'", row + 1)
            })
        };
        field.push(unit.to_tesla(parse(values[0])?));
        signal.push(parse(values[1])?);
    }

    // Down-sweeps are stored in ascending field order.
    if field.len() >= 2 && field[0] > field[field.len() - 1] {
        field.reverse();
        signal.reverse();
    }

    let spectrum = Spectrum::derivative(field, signal, metadata)?;
    Ok(spectrum.with_source_id(source))
}

fn split_header_line(content: &str) -> Option<(&str, &str)> {
    let separator = content.find([':', '='])?;
    let key = content[..separator].trim();
    let value = content[separator + 1..].trim();
    let plausible_key = !key.is_empty()
        && key
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || " _-()[]".contains(character));
    plausible_key.then_some((key, value))
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|character| if character.is_ascii_alphanumeric() { character } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn apply_header(
    metadata: &mut SpectrumMetadata,
    field_unit: &mut Option<FieldUnit>,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    metadata
        .raw_header
        .insert(key.to_string(), value.to_string());
    let key = normalize_key(key);

    match key.as_str() {
        "frequency" | "frequency_ghz" | "frequency_hz" | "mw_frequency"
        | "microwave_frequency" | "microwave_frequency_ghz" => {
            let (number, unit) = parse_quantity(value)?;
            let unit = unit_or_key_suffix(&unit, &key);
            metadata.frequency_hz = Some(match unit.as_str() {
                "ghz" => ghz_to_hz(number),
                "mhz" => number * 1.0e6,
                "hz" => number,
                _ if number < 1.0e3 => ghz_to_hz(number),
                _ => number,
            });
        }
        "power" | "power_mw" | "power_w" | "microwave_power" | "mw_power" => {
            let (number, unit) = parse_quantity(value)?;
            let unit = unit_or_key_suffix(&unit, &key);
            metadata.microwave_power_w = Some(match unit.as_str() {
                "w" => number,
                _ => mw_to_w(number),
            });
        }
        "temperature" | "temperature_k" => {
            metadata.temperature_k = Some(parse_quantity(value)?.0);
        }
        "modulation_amplitude" | "modulation_amplitude_g" | "modulation_amplitude_mt"
        | "mod_amplitude" => {
            let (number, unit) = parse_quantity(value)?;
            let unit = unit_or_key_suffix(&unit, &key);
            metadata.modulation_amplitude_t = Some(match unit.as_str() {
                "mt" => mt_to_t(number),
                "t" => number,
                _ => gauss_to_t(number),
            });
        }
        "phase" | "phase_deg" | "phase_rad" => {
            let (number, unit) = parse_quantity(value)?;
            let unit = unit_or_key_suffix(&unit, &key);
            metadata.phase_rad = Some(match unit.as_str() {
                "rad" => number,
                _ => number.to_radians(),
            });
        }
        "field_unit" | "field_units" => {
            *field_unit = Some(FieldUnit::from_header(value));
        }
        "instrument" => metadata.instrument = Some(value.to_string()),
        "operator" => metadata.operator = Some(value.to_string()),
        "notes" | "comment" => metadata.notes = Some(value.to_string()),
        "timestamp" | "date" => metadata.timestamp = Some(value.to_string()),
        _ => {}
    }
    Ok(())
}

fn unit_or_key_suffix(unit: &str, key: &str) -> String {
    if !unit.is_empty() {
        return unit.to_ascii_lowercase();
    }
    key.rsplit_once('_')
        .map(|(_, suffix)| suffix.to_string())
        .unwrap_or_default()
}

/// Splits `"9.5 GHz"` or `"9.5GHz"` into the number and its unit token.
fn parse_quantity(value: &str) -> anyhow::Result<(f64, String)> {
    let value = value.trim();
    (1..=value.len())
        .rev()
        .filter(|end| value.is_char_boundary(*end))
        .find_map(|end| {
            let number = value[..end].trim().parse::<f64>().ok()?;
            Some((number, value[end..].trim().to_string()))
        })
        .ok_or_else(|| anyhow!("'{value}' does not start with a number"))
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split([',', ';', '\t', ' '])
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect()
}

fn detect_delimiter(line: &str) -> u8 {
    if line.contains(',') {
        b','
    } else if line.contains(';') {
        b';'
    } else if line.contains('\t') {
        b'\t'
    } else {
        b' '
    }
}
