//! Effect Parameter Map
//!
//! A typed, ranged, paged dictionary from parameter names to values. All
//! values are stored as canonical strings; kinds and ranges are used to
//! validate incoming sets, which are silently refused when they do not
//! fit. Paging is a pure naming convention (`k#name`) used by the
//! multiband compander to expose up to ten bands through one flat map.

use serde::{Deserialize, Serialize};

/// The value kind of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Int,
    Real,
    Enum,
    Unknown,
}

/// What a host should refresh after a `set_value` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueChangeKind {
    /// Every parameter may have changed; rebuild the whole surface.
    GlobalChange,
    /// The active page switched.
    PageChange,
    /// The number of pages changed.
    PageCountChange,
    /// A single parameter changed.
    ParameterChange,
    /// Nothing happened (value unchanged or refused).
    NoChange,
}

/// Page index of the page-index selector parameter (`-1#`).
pub const PAGE_SELECTOR_INDEX: i32 = -1;

/// Page index of the page-count selector parameter (`-2#`).
pub const PAGE_COUNTER_INDEX: i32 = -2;

/// Parse a stored parameter value as a real; invalid text maps to zero.
/// Only meaningful for values that already passed map validation.
pub(crate) fn to_real(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(0.0)
}

/// Parse a stored parameter value as a non-negative integer.
pub(crate) fn to_natural(value: &str) -> usize {
    match value.trim().parse::<f64>() {
        Ok(numeric) if numeric > 0.0 => numeric as usize,
        _ => 0,
    }
}

#[derive(Debug, Clone)]
struct ParameterEntry {
    name: String,
    kind: ParameterKind,
    low: f64,
    high: f64,
    step: f64,
    enum_values: Vec<String>,
    value: String,
    is_active: bool,
}

impl ParameterEntry {
    fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            low: 0.0,
            high: 0.0,
            step: 0.0,
            enum_values: Vec::new(),
            value: String::new(),
            is_active: true,
        }
    }
}

/// The parameter dictionary of one effect. Iteration order is insertion
/// order.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: Vec<ParameterEntry>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all parameters.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Full parameter names in insertion order.
    pub fn parameter_name_list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Build the paged spelling `page#name`.
    pub fn paged_parameter_name(name: &str, page: i32) -> String {
        format!("{}#{}", page, name)
    }

    /// Split `k#name` into page index and bare name; names without a page
    /// marker are page 0.
    pub fn split_parameter_name(name: &str) -> (i32, &str) {
        if let Some((prefix, bare)) = name.split_once('#') {
            if let Ok(page) = prefix.parse::<i32>() {
                return (page, bare);
            }
        }
        (0, name)
    }

    /// Find an entry by full name, falling back to the bare name so that
    /// any page spelling (`0#Band Count`, `-2#Band Count`, `Band Count`)
    /// resolves to the same parameter.
    fn find(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.entries.iter().position(|e| e.name == name) {
            return Some(index);
        }
        let bare = Self::split_parameter_name(name).1;
        self.entries
            .iter()
            .position(|e| Self::split_parameter_name(&e.name).1 == bare)
    }

    fn entry_or_insert(&mut self, name: &str, kind: ParameterKind) -> &mut ParameterEntry {
        match self.entries.iter().position(|e| e.name == name) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.kind = kind;
                entry
            }
            None => {
                self.entries.push(ParameterEntry::new(name, kind));
                self.entries.last_mut().expect("entry was just pushed")
            }
        }
    }

    /// Register an integer parameter with inclusive range and step.
    pub fn set_kind_int(&mut self, name: &str, low: i64, high: i64, step: i64) {
        let entry = self.entry_or_insert(name, ParameterKind::Int);
        entry.low = low as f64;
        entry.high = high as f64;
        entry.step = step as f64;
        entry.enum_values.clear();
    }

    /// Register a real parameter with inclusive range and step.
    pub fn set_kind_real(&mut self, name: &str, low: f64, high: f64, step: f64) {
        let entry = self.entry_or_insert(name, ParameterKind::Real);
        entry.low = low;
        entry.high = high;
        entry.step = step;
        entry.enum_values.clear();
    }

    /// Register an enumeration parameter over `values`.
    pub fn set_kind_enum(&mut self, name: &str, values: &[&str]) {
        let entry = self.entry_or_insert(name, ParameterKind::Enum);
        entry.enum_values = values.iter().map(|v| v.to_string()).collect();
    }

    /// Register an enumeration parameter and set its value in one go.
    pub fn set_kind_and_value_enum(&mut self, name: &str, values: &[&str], value: &str) {
        self.set_kind_enum(name, values);
        self.set_value(name, value);
    }

    /// Kind of `name`, `Unknown` when the parameter does not exist.
    pub fn kind(&self, name: &str) -> ParameterKind {
        self.find(name)
            .map_or(ParameterKind::Unknown, |i| self.entries[i].kind)
    }

    /// Current value of `name` as its canonical string; empty when the
    /// parameter does not exist.
    pub fn value(&self, name: &str) -> &str {
        self.find(name)
            .map_or("", |i| self.entries[i].value.as_str())
    }

    /// Range `(low, high, step)` of a numeric parameter.
    pub fn range(&self, name: &str) -> Option<(f64, f64, f64)> {
        self.find(name).and_then(|i| {
            let entry = &self.entries[i];
            match entry.kind {
                ParameterKind::Int | ParameterKind::Real => {
                    Some((entry.low, entry.high, entry.step))
                }
                _ => None,
            }
        })
    }

    /// Allowed values of an enum parameter.
    pub fn enum_values(&self, name: &str) -> &[String] {
        match self.find(name) {
            Some(index) => &self.entries[index].enum_values,
            None => &[],
        }
    }

    /// Whether `value` would be accepted for `name`.
    pub fn is_allowed_value(&self, name: &str, value: &str) -> bool {
        let Some(index) = self.find(name) else {
            return false;
        };
        let entry = &self.entries[index];
        match entry.kind {
            ParameterKind::Int | ParameterKind::Real => match value.trim().parse::<f64>() {
                Ok(numeric) => {
                    if !(entry.low..=entry.high).contains(&numeric) {
                        return false;
                    }
                    if entry.step <= 0.0 {
                        return true;
                    }
                    // step alignment with half-a-step tolerance
                    let steps = (numeric - entry.low) / entry.step;
                    let nearest = entry.low + libm::Libm::<f64>::round(steps) * entry.step;
                    (numeric - nearest).abs() <= entry.step * 0.5 + f64::EPSILON
                }
                Err(_) => false,
            },
            ParameterKind::Enum => entry.enum_values.iter().any(|v| v == value),
            ParameterKind::Unknown => false,
        }
    }

    /// Store `value` for `name` after validation; out-of-range,
    /// non-member or unparseable values are refused and leave the map
    /// unchanged. Returns whether the value was stored.
    pub fn set_value(&mut self, name: &str, value: &str) -> bool {
        if !self.is_allowed_value(name, value) {
            return false;
        }
        let index = self.find(name).expect("allowed value implies existence");
        self.entries[index].value = value.trim().to_string();
        true
    }

    /// Forget the stored value so that the next `set_value` is never
    /// short-circuited by the same-value check. Used by the persistence
    /// reader.
    pub fn invalidate_value(&mut self, name: &str) {
        if let Some(index) = self.find(name) {
            self.entries[index].value.clear();
        }
    }

    /// Whether the parameter is visible for the currently active page.
    pub fn is_active(&self, name: &str) -> bool {
        self.find(name).is_some_and(|i| self.entries[i].is_active)
    }

    /// Update every entry's active flag for `page`: page-0 and selector
    /// parameters are always active, page-local parameters only when
    /// their page matches.
    pub fn change_activeness_by_page(&mut self, page: i32) {
        for entry in &mut self.entries {
            let (entry_page, _) = Self::split_parameter_name(&entry.name);
            entry.is_active = entry_page <= 0 || entry_page == page;
        }
    }
}
