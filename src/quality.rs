use regex::{RegexSet, RegexSetBuilder};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::templates::Mode;

/// Outputs scoring below this are regenerated when cascading.
const CASCADE_THRESHOLD: f32 = 0.8;

const MIN_STRUCTURED_CHARS: usize = 600;
const SHORT_OUTPUT_PENALTY: f32 = 0.8;

fn expected_headers(mode: Mode) -> &'static [&'static str] {
    match mode {
        Mode::Image => &[
            r"Maqsad",
            r"Kompozitsiya|Композиция",
            r"Mavzu|Детали",
            r"Uslub|Стиль",
            r"Kamera|Камера",
            r"Chiqish|Параметры",
            r"Nimalar|Исключить",
            r"Tekshirish|Уточняющий",
        ],
        Mode::Video => &[
            r"Maqsad|Цель",
            r"Syujet|Сцены",
            r"Kadr|Шот",
            r"Ovoz|Озвучка",
            r"Chiqish|Параметры",
            r"Tekshirish|Уточняющий",
        ],
        Mode::Coding => &[
            r"Maqsad|Цель",
            r"Kirish|Вход",
            r"Cheklov|Огранич",
            r"Chiqish|Формат",
            r"Qadam|Шаг",
            r"Test|Тест",
            r"Tekshirish|Уточняющий",
        ],
        Mode::Chatgpt => &[
            r"Maqsad|Цель",
            r"Rollar|Роли",
            r"Qadam|Шаг",
            r"Misol|Пример",
            r"Cheklov|Огранич",
            r"Tekshirish|Уточняющий",
        ],
    }
}

static HEADER_SETS: LazyLock<HashMap<Mode, RegexSet>> = LazyLock::new(|| {
    Mode::ALL
        .into_iter()
        .map(|mode| {
            let set = RegexSetBuilder::new(expected_headers(mode))
                .case_insensitive(true)
                .build()
                .expect("section header patterns must compile");
            (mode, set)
        })
        .collect()
});

fn header_set(mode: Mode) -> &'static RegexSet {
    &HEADER_SETS[&mode]
}

/// Share of the mode's expected section headers found in `text`, scaled
/// down when the output is too short to be a structured prompt.
pub fn score(mode: Mode, text: &str) -> f32 {
    let headers = header_set(mode);
    let hits = headers.matches(text).iter().count();

    let base = hits as f32 / headers.len().max(1) as f32;
    if text.trim().chars().count() > MIN_STRUCTURED_CHARS {
        base
    } else {
        base * SHORT_OUTPUT_PENALTY
    }
}

pub fn needs_fallback(mode: Mode, text: &str) -> bool {
    score(mode, text) < CASCADE_THRESHOLD
}
