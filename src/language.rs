/// Output language the model is instructed to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Uzbek,
    Russian,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Uzbek => "uz",
            Self::Russian => "ru",
        }
    }
}

// Letters of the Uzbek Cyrillic alphabet that Russian does not use.
const UZBEK_CYRILLIC: [char; 8] = ['ў', 'Ў', 'қ', 'Қ', 'ғ', 'Ғ', 'ҳ', 'Ҳ'];

/// Script-based guess between Uzbek and Russian.
///
/// Cyrillic-majority text is Russian unless it carries an Uzbek-only
/// Cyrillic letter. Latin, mixed, or letterless input falls back to Uzbek.
pub fn detect(text: &str) -> Language {
    let mut cyrillic = 0usize;
    let mut latin = 0usize;

    for ch in text.chars() {
        if UZBEK_CYRILLIC.contains(&ch) {
            return Language::Uzbek;
        }
        if is_cyrillic(ch) {
            cyrillic += 1;
        } else if ch.is_ascii_alphabetic() {
            latin += 1;
        }
    }

    if cyrillic > latin {
        Language::Russian
    } else {
        Language::Uzbek
    }
}

fn is_cyrillic(ch: char) -> bool {
    matches!(ch, '\u{0400}'..='\u{04FF}')
}
