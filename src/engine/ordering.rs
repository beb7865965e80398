// Anatomical ordering of vertebra labels: cervical, thoracic, lumbar, sacral.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Cervical,
    Thoracic,
    Lumbar,
    Sacral,
    Unknown,
}

impl Section {
    pub fn from_letter(letter: char) -> Self {
        match letter {
            'C' => Section::Cervical,
            'T' => Section::Thoracic,
            'L' => Section::Lumbar,
            'S' => Section::Sacral,
            _ => Section::Unknown,
        }
    }
}

/// Sort key for a `<Section><Number>` label. A number that does not parse
/// maps to `None`, which sorts after every parsed number in its section.
fn sort_key(label: &str) -> (Section, Option<u32>) {
    let mut chars = label.chars();
    let section = chars.next().map_or(Section::Unknown, Section::from_letter);
    let number = chars.as_str().parse::<u32>().ok();
    (section, number)
}

/// Total order over vertebra labels: section rank, then the number compared
/// numerically ("T2" before "T12"), then the label text.
pub fn anatomical_cmp(a: &str, b: &str) -> Ordering {
    let (section_a, number_a) = sort_key(a);
    let (section_b, number_b) = sort_key(b);
    section_a
        .cmp(&section_b)
        .then_with(|| match (number_a, number_b) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.cmp(b))
}

pub fn sort_labels<S: AsRef<str>>(labels: &mut [S]) {
    labels.sort_by(|a, b| anatomical_cmp(a.as_ref(), b.as_ref()));
}
