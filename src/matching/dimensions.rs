//! Numeric dimension extraction from product and line-item text.
//!
//! Width is only ever read from an explicit dimensional context
//! (`457 mm x`, `457 x 600`, `Width: 457`, `Breite: 457`, `, 457 mm`).
//! A bare 3–4 digit number is NEVER a width — quantities and article
//! numbers look exactly like that, and the confusion has real cost.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::ItemAttributes;

/// Comparison tolerance for dimension values, in the dimension's unit.
pub const DIMENSION_TOLERANCE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    WidthMm,
    HeightMm,
    ThicknessMm,
    LengthM,
}

/// The set of dimensions found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionSet {
    values: Vec<(Dim, f64)>,
}

impl DimensionSet {
    pub fn insert(&mut self, dim: Dim, value: f64) {
        if !self.values.iter().any(|(d, _)| *d == dim) {
            self.values.push((dim, value));
        }
    }

    pub fn get(&self, dim: Dim) -> Option<f64> {
        self.values.iter().find(|(d, _)| *d == dim).map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl From<&ItemAttributes> for DimensionSet {
    fn from(attrs: &ItemAttributes) -> Self {
        let mut set = DimensionSet::default();
        if let Some(w) = attrs.width_mm {
            set.insert(Dim::WidthMm, w);
        }
        if let Some(h) = attrs.height_mm {
            set.insert(Dim::HeightMm, h);
        }
        if let Some(t) = attrs.thickness_mm {
            set.insert(Dim::ThicknessMm, t);
        }
        if let Some(l) = attrs.length_m {
            set.insert(Dim::LengthM, l);
        }
        set
    }
}

fn num(s: &str) -> Option<f64> {
    s.replace(',', ".").parse().ok()
}

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

// Width contexts. Each one is explicit; nothing here matches a bare number.
cached_regex!(width_mm_x, r"(?i)\b(\d{1,4}(?:[.,]\d+)?)\s*mm\s*[x×*]");
cached_regex!(width_n_x_m, r"(?i)\b(\d{1,4}(?:[.,]\d+)?)\s*[x×*]\s*(\d{1,4}(?:[.,]\d+)?)");
cached_regex!(width_labeled, r"(?i)\b(?:width|breite|b)\s*[:=]\s*(\d{1,4}(?:[.,]\d+)?)");
cached_regex!(width_comma_mm, r"(?i),\s*(\d{1,4}(?:[.,]\d+)?)\s*mm\b");

// Thickness and length contexts.
cached_regex!(thickness_labeled, r"(?i)\b(?:thickness|st[äa]rke|dicke)\s*[:=]?\s*(\d{1,2}(?:[.,]\d+)?)\s*(?:mm)?\b");
cached_regex!(triple_dims, r"(?i)\b(\d{1,4}(?:[.,]\d+)?)\s*[x×*]\s*(\d{1,4}(?:[.,]\d+)?)\s*[x×*]\s*(\d{1,2}(?:[.,]\d+)?)");
cached_regex!(length_labeled, r"(?i)\b(?:length|l[äa]nge)\s*[:=]?\s*(\d{1,5}(?:[.,]\d+)?)\s*m\b");
cached_regex!(length_unit, r"(?i)\b(\d{1,5}(?:[.,]\d+)?)\s*m\b");

/// Width from explicit dimensional context only.
pub fn extract_width_mm(text: &str) -> Option<f64> {
    if let Some(c) = width_mm_x().captures(text) {
        return num(&c[1]);
    }
    if let Some(c) = width_labeled().captures(text) {
        return num(&c[1]);
    }
    if let Some(c) = width_n_x_m().captures(text) {
        return num(&c[1]);
    }
    if let Some(c) = width_comma_mm().captures(text) {
        return num(&c[1]);
    }
    None
}

/// All dimensions found in the text.
pub fn extract_dimensions(text: &str) -> DimensionSet {
    let mut set = DimensionSet::default();

    if let Some(w) = extract_width_mm(text) {
        set.insert(Dim::WidthMm, w);
    }

    if let Some(c) = triple_dims().captures(text) {
        if let (Some(h), Some(t)) = (num(&c[2]), num(&c[3])) {
            set.insert(Dim::HeightMm, h);
            set.insert(Dim::ThicknessMm, t);
        }
    } else if let Some(c) = width_n_x_m().captures(text) {
        if let Some(second) = num(&c[2]) {
            set.insert(Dim::HeightMm, second);
        }
    }

    if let Some(c) = thickness_labeled().captures(text) {
        if let Some(t) = num(&c[1]) {
            set.insert(Dim::ThicknessMm, t);
        }
    }

    if let Some(c) = length_labeled().captures(text) {
        if let Some(l) = num(&c[1]) {
            set.insert(Dim::LengthM, l);
        }
    } else if let Some(c) = length_unit().captures(text) {
        if let Some(l) = num(&c[1]) {
            set.insert(Dim::LengthM, l);
        }
    }

    set
}

/// Intersection-over-union of two dimension sets with ±5 tolerance.
///
/// A dimension counts toward the intersection when both sides carry it
/// and the values agree within tolerance. The union counts dimensions
/// present on either side.
pub fn dimension_overlap(a: &DimensionSet, b: &DimensionSet) -> f32 {
    const ALL: [Dim; 4] = [Dim::WidthMm, Dim::HeightMm, Dim::ThicknessMm, Dim::LengthM];

    let mut union = 0u32;
    let mut intersection = 0u32;

    for dim in ALL {
        match (a.get(dim), b.get(dim)) {
            (Some(av), Some(bv)) => {
                union += 1;
                if (av - bv).abs() <= DIMENSION_TOLERANCE {
                    intersection += 1;
                }
            }
            (Some(_), None) | (None, Some(_)) => union += 1,
            (None, None) => {}
        }
    }

    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// True when both sides state dimensions and none of the shared ones
/// agree — the strongest disagreement signal.
pub fn dimensions_conflict(a: &DimensionSet, b: &DimensionSet) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    const ALL: [Dim; 4] = [Dim::WidthMm, Dim::HeightMm, Dim::ThicknessMm, Dim::LengthM];
    let mut shared = 0;
    let mut agreeing = 0;
    for dim in ALL {
        if let (Some(av), Some(bv)) = (a.get(dim), b.get(dim)) {
            shared += 1;
            if (av - bv).abs() <= DIMENSION_TOLERANCE {
                agreeing += 1;
            }
        }
    }
    shared > 0 && agreeing == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_are_never_width() {
        // Quantity-as-width confusion guard.
        assert_eq!(extract_width_mm("order 234 pieces"), None);
        assert_eq!(extract_width_mm("SDS1923 Duro Seal Bobst Universal HS Cod 234"), None);
        assert_eq!(extract_width_mm("1520"), None);
        assert_eq!(extract_width_mm("article 4571"), None);
    }

    #[test]
    fn width_from_mm_x_context() {
        assert_eq!(extract_width_mm("457 mm x 2000 mm roll"), Some(457.0));
    }

    #[test]
    fn width_from_n_x_m() {
        assert_eq!(extract_width_mm("blade 457 x 600"), Some(457.0));
    }

    #[test]
    fn width_from_labels() {
        assert_eq!(extract_width_mm("Width: 457"), Some(457.0));
        assert_eq!(extract_width_mm("Breite: 600"), Some(600.0));
        assert_eq!(extract_width_mm("breite = 35"), Some(35.0));
    }

    #[test]
    fn width_from_comma_mm() {
        assert_eq!(extract_width_mm("Duro Seal, 457 mm"), Some(457.0));
    }

    #[test]
    fn decimal_comma_in_width() {
        assert_eq!(extract_width_mm("12,5 mm x 33 m"), Some(12.5));
    }

    #[test]
    fn n_x_m_yields_width_and_height() {
        let dims = extract_dimensions("seal 457 x 600");
        assert_eq!(dims.get(Dim::WidthMm), Some(457.0));
        assert_eq!(dims.get(Dim::HeightMm), Some(600.0));
    }

    #[test]
    fn triple_dims_include_thickness() {
        let dims = extract_dimensions("plate 457 x 600 x 1,5");
        assert_eq!(dims.get(Dim::WidthMm), Some(457.0));
        assert_eq!(dims.get(Dim::HeightMm), Some(600.0));
        assert_eq!(dims.get(Dim::ThicknessMm), Some(1.5));
    }

    #[test]
    fn thickness_from_german_label() {
        let dims = extract_dimensions("Stärke 1,7 mm");
        assert_eq!(dims.get(Dim::ThicknessMm), Some(1.7));
    }

    #[test]
    fn length_from_meter_unit_not_mm() {
        let dims = extract_dimensions("roll 33 m");
        assert_eq!(dims.get(Dim::LengthM), Some(33.0));

        let no_len = extract_dimensions("457 mm");
        assert_eq!(no_len.get(Dim::LengthM), None);
    }

    #[test]
    fn overlap_within_tolerance() {
        let mut a = DimensionSet::default();
        a.insert(Dim::WidthMm, 457.0);
        let mut b = DimensionSet::default();
        b.insert(Dim::WidthMm, 460.0);
        assert!((dimension_overlap(&a, &b) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn overlap_outside_tolerance_is_zero() {
        let mut a = DimensionSet::default();
        a.insert(Dim::WidthMm, 457.0);
        let mut b = DimensionSet::default();
        b.insert(Dim::WidthMm, 600.0);
        assert_eq!(dimension_overlap(&a, &b), 0.0);
        assert!(dimensions_conflict(&a, &b));
    }

    #[test]
    fn overlap_is_iou_over_union() {
        let mut a = DimensionSet::default();
        a.insert(Dim::WidthMm, 457.0);
        a.insert(Dim::ThicknessMm, 1.5);
        let mut b = DimensionSet::default();
        b.insert(Dim::WidthMm, 457.0);
        // union = {width, thickness}, intersection = {width}
        assert!((dimension_overlap(&a, &b) - 0.5).abs() < f32::EPSILON);
        assert!(!dimensions_conflict(&a, &b));
    }

    #[test]
    fn empty_sets_have_zero_overlap_and_no_conflict() {
        let empty = DimensionSet::default();
        let mut one = DimensionSet::default();
        one.insert(Dim::WidthMm, 100.0);
        assert_eq!(dimension_overlap(&empty, &empty), 0.0);
        assert_eq!(dimension_overlap(&empty, &one), 0.0);
        assert!(!dimensions_conflict(&empty, &one));
    }

    #[test]
    fn attributes_convert_to_dimension_set() {
        let attrs = ItemAttributes {
            width_mm: Some(457.0),
            thickness_mm: Some(1.5),
            ..Default::default()
        };
        let set = DimensionSet::from(&attrs);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(Dim::WidthMm), Some(457.0));
    }
}
