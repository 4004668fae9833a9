use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::language::Language;

const SYSTEM_UZ: &str = "Siz tajribali prompt muhandisisiz. Foydalanuvchining xom so'rovini \
aniq, tuzilgan va to'liq yakuniy promptga aylantirasiz. \
Javobni faqat o'zbek tilida yozing. Foydalanuvchi xabarini takrorlamang.";

const SYSTEM_RU: &str = "Вы опытный промпт-инженер. Превращаете сырой запрос пользователя \
в точный, структурированный и полный итоговый промпт. \
Отвечайте только на русском языке. Не повторяйте сообщение пользователя.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Mode {
    Coding,
    Image,
    Video,
    Chatgpt,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Coding, Mode::Image, Mode::Video, Mode::Chatgpt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Image => "image",
            Self::Video => "video",
            Self::Chatgpt => "chatgpt",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(raw))
    }

    fn builtin_sections(&self) -> &'static [&'static str] {
        match self {
            Self::Coding => &[
                "Maqsad / Цель",
                "Kirish ma'lumotlari / Входные данные",
                "Cheklovlar / Ограничения",
                "Chiqish formati / Формат вывода",
                "Qadamlar / Шаги",
                "Testlar / Тесты",
                "Tekshirish savoli / Уточняющий вопрос",
            ],
            Self::Image => &[
                "Maqsad / Цель",
                "Kompozitsiya / Композиция",
                "Mavzu detali / Детали объекта",
                "Uslub & Yoritish / Стиль и освещение",
                "Kamera / Камера",
                "Chiqish parametrlari / Параметры вывода",
                "Nimalar kiritilmasin / Исключить",
                "Tekshirish savoli / Уточняющий вопрос",
            ],
            Self::Video => &[
                "Maqsad / Цель",
                "Syujet / Сцены",
                "Kadrlar / Шоты",
                "Ovoz / Озвучка",
                "Chiqish parametrlari / Параметры вывода",
                "Tekshirish savoli / Уточняющий вопрос",
            ],
            Self::Chatgpt => &[
                "Maqsad / Цель",
                "Rollar / Роли",
                "Qadamlar / Шаги",
                "Misollar / Примеры",
                "Cheklovlar / Ограничения",
                "Tekshirish savoli / Уточняющий вопрос",
            ],
        }
    }
}

struct Example {
    input: &'static str,
    output: &'static str,
}

fn example_for(language: Language) -> Example {
    match language {
        Language::Uzbek => Example {
            input: "rasm chiz: tog' etagidagi yog'och uy",
            output: "Maqsad: tog' etagidagi yog'och uyning realistik rasmi.\n\
                     Kompozitsiya: bitta uy, orqa fonda qorli cho'qqilar.\n\
                     Mavzu detali: qarag'ay yog'ochi, mo'ridan tutun chiqmoqda.\n\
                     Uslub & Yoritish: quyosh botishi, iliq yorug'lik.\n\
                     Kamera: 50mm, ko'z darajasida.\n\
                     Chiqish parametrlari: 1024x1024.\n\
                     Nimalar kiritilmasin: odamlar, yozuvlar.\n\
                     Tekshirish savoli: Fasl qaysi bo'lsin? (qish/yoz)",
        },
        Language::Russian => Example {
            input: "напиши промпт для бота поддержки интернет-магазина",
            output: "Цель: готовый промпт для бота поддержки интернет-магазина.\n\
                     Роли: бот/покупатель/система.\n\
                     Шаги: определить тему обращения → ответ → эскалация оператору.\n\
                     Примеры: статус заказа, возврат, доставка.\n\
                     Ограничения: до 1000 символов, без выдачи личных данных.\n\
                     Уточняющий вопрос: какие каналы связи поддерживает магазин?",
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeSpec {
    #[serde(default)]
    pub sections: Vec<String>,
}

/// A rendered template with exactly one substitution point for the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    before: String,
    after: String,
}

impl PromptTemplate {
    pub fn fill(&self, input: &str) -> String {
        let mut prompt = String::with_capacity(self.before.len() + input.len() + self.after.len());
        prompt.push_str(&self.before);
        prompt.push_str(input);
        prompt.push_str(&self.after);
        prompt
    }
}

/// System instructions per language plus the section list of every mode.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    system_uz: String,
    system_ru: String,
    modes: HashMap<Mode, ModeSpec>,
}

impl TemplateSet {
    pub fn builtin() -> Self {
        let modes = Mode::ALL
            .into_iter()
            .map(|mode| {
                let sections = mode
                    .builtin_sections()
                    .iter()
                    .map(|section| section.to_string())
                    .collect();
                (mode, ModeSpec { sections })
            })
            .collect();

        Self {
            system_uz: SYSTEM_UZ.to_string(),
            system_ru: SYSTEM_RU.to_string(),
            modes,
        }
    }

    /// Overlays `system_uz.txt`, `system_ru.txt` and `modes.yaml` from `dir`
    /// on top of the built-in set. Missing files keep the built-in value.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::builtin();

        if let Some(text) = read_optional(&dir.join("system_uz.txt"))? {
            set.system_uz = text;
        }
        if let Some(text) = read_optional(&dir.join("system_ru.txt"))? {
            set.system_ru = text;
        }

        let modes_path = dir.join("modes.yaml");
        if let Some(raw) = read_optional(&modes_path)? {
            let overrides = parse_modes(&raw)
                .with_context(|| format!("Failed to parse '{}'", modes_path.display()))?;
            set.modes.extend(overrides);
        }

        debug!(dir = %dir.display(), "loaded prompt templates");
        Ok(set)
    }

    pub fn system(&self, language: Language) -> &str {
        match language {
            Language::Uzbek => &self.system_uz,
            Language::Russian => &self.system_ru,
        }
    }

    pub fn sections(&self, mode: Mode) -> &[String] {
        self.modes
            .get(&mode)
            .map(|spec| spec.sections.as_slice())
            .unwrap_or_default()
    }

    /// The fixed, mode-specific instruction block.
    pub fn instruction(&self, mode: Mode) -> String {
        let bullets = self
            .sections(mode)
            .iter()
            .map(|section| format!("- {section}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Rejim / Режим: {}\nBo'limlar / Разделы:\n{}",
            mode.as_str(),
            bullets
        )
    }

    pub fn render(&self, mode: Mode, language: Language, max_bullets: u32) -> PromptTemplate {
        let example = example_for(language);
        let before = format!(
            "{system}\n\n\
             === Yo'riqnoma / Инструкция ===\n{instruction}\n\n\
             === Misol / Пример ===\n\
             Kirish / Вход: {example_input}\n\
             Chiqish / Выход: {example_output}\n\n\
             === Foydalanuvchi kirishi / Пользовательский ввод ===\n",
            system = self.system(language).trim(),
            instruction = self.instruction(mode),
            example_input = example.input,
            example_output = example.output,
        );
        let after = format!(
            "\n\n=== Vazifa / Задача ===\n\
             1) Kirishdan kelib chiqib, tanlangan rejimga mos ravishda to'liq TUZILGAN yakuniy PROMPT yozing.\n\
             2) Tilni saqlang (UZ yoki RU). Max {max_bullets} banddan oshirmang.\n\
             3) Agar kerak bo'lsa, \"Nimalar kiritilmasin / Исключить\" bandini qo'shing."
        );
        PromptTemplate { before, after }
    }

    pub fn compose(&self, input: &str, mode: Mode, language: Language, max_bullets: u32) -> String {
        self.render(mode, language, max_bullets).fill(input)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("Failed to read template '{}'", path.display()))
}

fn parse_modes(raw: &str) -> Result<HashMap<Mode, ModeSpec>> {
    let parsed: Option<HashMap<String, ModeSpec>> = serde_yaml::from_str(raw)?;
    let mut modes = HashMap::new();
    for (name, spec) in parsed.unwrap_or_default() {
        match Mode::from_name(&name) {
            Some(mode) => {
                modes.insert(mode, spec);
            }
            None => warn!(mode = %name, "ignoring template for unknown mode"),
        }
    }
    Ok(modes)
}
