//! Effect State Persistence
//!
//! Human-readable key/value persistence for effect parameters. The first
//! line is the effect name; every following line is `name = value` in
//! parameter-map insertion order. Enum values are double-quoted, with a
//! doubled quote escaping an embedded one; real values are rounded to
//! four decimal places. Readers tolerate unknown keys, malformed lines
//! and a mismatching title, and keep prior values for anything invalid.

use crate::effect::{AudioEffect, EffectError};
use crate::params::ParameterKind;

/// Decimal places kept for real values in serialized form.
const DECIMAL_PLACE_COUNT: i32 = 4;

const QUOTE: char = '"';

/// Round to [`DECIMAL_PLACE_COUNT`] places and format without trailing
/// zeros, so repeated serialization is byte-stable.
fn format_real(value: f64) -> String {
    let scale = libm::Libm::<f64>::pow(10.0, DECIMAL_PLACE_COUNT as f64);
    let rounded = libm::Libm::<f64>::round(value * scale) / scale;
    format!("{}", rounded)
}

fn quote(value: &str) -> String {
    let mut result = String::with_capacity(value.len() + 2);
    result.push(QUOTE);
    for character in value.chars() {
        if character == QUOTE {
            result.push(QUOTE);
        }
        result.push(character);
    }
    result.push(QUOTE);
    result
}

fn unquote(value: &str) -> String {
    let inner = &value[1..value.len() - 1];
    inner.replace("\"\"", "\"")
}

/// Serialize an effect's parameters into the persistence block.
pub fn serialize(effect: &dyn AudioEffect) -> String {
    let map = effect.parameter_map();
    let mut result = String::new();
    result.push_str(effect.name());
    result.push('\n');

    for name in map.parameter_name_list() {
        let value = match map.kind(name) {
            ParameterKind::Enum => quote(map.value(name)),
            ParameterKind::Real => match map.value(name).parse::<f64>() {
                Ok(numeric) => format_real(numeric),
                Err(_) => map.value(name).to_string(),
            },
            _ => map.value(name).to_string(),
        };
        result.push_str(name);
        result.push_str(" = ");
        result.push_str(&value);
        result.push('\n');
    }

    result
}

/// Restore an effect from a persistence block produced by [`serialize`].
///
/// Recalculation of derived DSP state is suppressed for every line but
/// the last, matching how the original restores whole parameter sets in
/// one sweep. Afterwards the effect's parameters are marked valid.
pub fn restore(effect: &mut dyn AudioEffect, text: &str) -> Result<(), EffectError> {
    if text.trim().is_empty() {
        return Err(EffectError::BadPersistence(
            "empty persistence payload".to_string(),
        ));
    }

    // first line is the title; a mismatch is tolerated
    let lines: Vec<&str> = text.lines().skip(1).collect();
    let last_assignment = lines.iter().rposition(|line| line.contains('='));

    for (index, line) in lines.iter().enumerate() {
        let Some((raw_name, raw_value)) = line.split_once('=') else {
            continue;
        };
        let name = raw_name.trim();
        let mut value = raw_value.trim().to_string();

        if value.len() >= 2 && value.starts_with(QUOTE) && value.ends_with(QUOTE) {
            value = unquote(&value);
        }

        // keep the prior value when the payload one is not acceptable
        if !effect.parameter_map().is_allowed_value(name, &value) {
            value = effect.parameter_map().value(name).to_string();
        }

        let suppress_recalc = Some(index) != last_assignment;
        effect.parameter_map_mut().invalidate_value(name);
        effect.set_value(name, &value, suppress_recalc);
    }

    effect.set_parameter_validity(true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{admit_value, EffectState, SetOutcome};
    use crate::params::{ParameterMap, ValueChangeKind};
    use crate::AudioSample;

    /// Minimal effect with one parameter of each kind.
    struct ProbeEffect {
        state: EffectState,
        map: ParameterMap,
        recalculations: usize,
    }

    impl ProbeEffect {
        fn new() -> Self {
            let mut map = ParameterMap::new();
            map.set_kind_real("Level [dB]", -10.0, 10.0, 0.001);
            map.set_kind_int("Taps", 1, 8, 1);
            map.set_kind_and_value_enum("Mode", &["Clean", "\"Hot\""], "Clean");
            map.set_value("Level [dB]", "0");
            map.set_value("Taps", "4");
            Self {
                state: EffectState::new(),
                map,
                recalculations: 0,
            }
        }
    }

    impl AudioEffect for ProbeEffect {
        fn name(&self) -> &'static str {
            "Probe"
        }

        fn parameter_map(&self) -> &ParameterMap {
            &self.map
        }

        fn parameter_map_mut(&mut self) -> &mut ParameterMap {
            &mut self.map
        }

        fn set_default_values(&mut self) {}

        fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError> {
            self.state.prepare(sample_rate)
        }

        fn release(&mut self) {
            self.state.release();
        }

        fn process(&mut self, _time_position: f64, _buffer: &mut [Vec<AudioSample>]) {}

        fn set_value(
            &mut self,
            name: &str,
            value: &str,
            suppress_recalc: bool,
        ) -> ValueChangeKind {
            match admit_value(&mut self.map, name, value) {
                SetOutcome::Unchanged | SetOutcome::Refused => ValueChangeKind::NoChange,
                SetOutcome::Stored => {
                    if !suppress_recalc {
                        self.recalculations += 1;
                    }
                    ValueChangeKind::ParameterChange
                }
            }
        }

        fn has_valid_parameters(&self) -> bool {
            self.state.parameters_are_valid
        }

        fn set_parameter_validity(&mut self, is_valid: bool) {
            self.state.parameters_are_valid = is_valid;
        }
    }

    #[test]
    fn test_serialized_layout() {
        let mut effect = ProbeEffect::new();
        effect.set_value("Level [dB]", "1.23456", false);
        let text = serialize(&effect);
        assert_eq!(
            text,
            "Probe\nLevel [dB] = 1.2346\nTaps = 4\nMode = \"Clean\"\n"
        );
    }

    #[test]
    fn test_enum_quote_escaping() {
        let mut effect = ProbeEffect::new();
        effect.set_value("Mode", "\"Hot\"", false);
        let text = serialize(&effect);
        assert!(text.contains("Mode = \"\"\"Hot\"\"\"\n"));

        let mut restored = ProbeEffect::new();
        restore(&mut restored, &text).unwrap();
        assert_eq!(restored.map.value("Mode"), "\"Hot\"");
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let mut effect = ProbeEffect::new();
        effect.set_value("Level [dB]", "-3.5", false);
        effect.set_value("Taps", "7", false);
        let first = serialize(&effect);

        let mut restored = ProbeEffect::new();
        restore(&mut restored, &first).unwrap();
        let second = serialize(&restored);
        assert_eq!(first, second);
        assert!(restored.has_valid_parameters());
    }

    #[test]
    fn test_restore_tolerates_junk() {
        let mut effect = ProbeEffect::new();
        let text = "Some Other Title\n\
                    Unknown Key = 12\n\
                    not a key value line\n\
                    Taps = 99\n\
                    Level [dB] = 2.5\n";
        restore(&mut effect, text).unwrap();
        // unknown key ignored, out-of-range taps kept at prior value
        assert_eq!(effect.map.value("Taps"), "4");
        assert_eq!(effect.map.value("Level [dB]"), "2.5");
    }

    #[test]
    fn test_restore_suppresses_all_but_last_recalculation() {
        let mut effect = ProbeEffect::new();
        let text = "Probe\nLevel [dB] = 1\nTaps = 2\nMode = \"Clean\"\n";
        restore(&mut effect, text).unwrap();
        assert_eq!(effect.recalculations, 1);
    }

    #[test]
    fn test_restore_switches_effect_kind() {
        // a phaser payload restored onto a fresh (tremolo) effect must
        // first switch the kind, then land the phaser parameters
        let mut donor = crate::modulation::PhaserTremoloEffect::new();
        donor.set_value("Effect Kind", "Phaser", false);
        donor.set_value("Decay", "0.6", false);
        donor.set_value("Delay [ms]", "2.5", false);
        let payload = serialize(&donor);

        let mut target = crate::modulation::PhaserTremoloEffect::new();
        assert!(!target.parameter_map().contains("Decay"));
        restore(&mut target, &payload).unwrap();
        assert_eq!(target.parameter_map().value("Effect Kind"), "Phaser");
        assert_eq!(target.parameter_map().value("Decay"), "0.6");
        assert_eq!(target.parameter_map().value("Delay [ms]"), "2.5");
    }

    #[test]
    fn test_round_trip_for_every_effect() {
        let mut effects: Vec<Box<dyn AudioEffect>> = vec![
            Box::new(crate::gain::GainEffect::new()),
            Box::new(crate::filter::FilterEffect::new()),
            Box::new(crate::modulation::PhaserTremoloEffect::new()),
            Box::new(crate::reverb::ReverbEffect::new()),
            Box::new(crate::compander::CompanderEffect::new()),
        ];

        for effect in effects.iter_mut() {
            effect.prepare(44100.0).unwrap();
            let first = serialize(effect.as_ref());
            restore(effect.as_mut(), &first).unwrap();
            let second = serialize(effect.as_ref());
            assert_eq!(first, second, "round trip for {}", effect.name());
        }
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let mut effect = ProbeEffect::new();
        assert!(matches!(
            restore(&mut effect, "  \n "),
            Err(EffectError::BadPersistence(_))
        ));
    }
}
