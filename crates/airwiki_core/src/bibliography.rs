use anyhow::{Result, anyhow, bail};
use biblatex::{Bibliography, ChunksExt, Entry, Person};
use serde::Serialize;
use serde_json::{Map, Value};

pub const FIELD_PUBLICATION_TYPE: &str = "Publication_type";
pub const FIELD_AUTHORS: &str = "Authors";
pub const FIELD_YEAR: &str = "Year";
pub const FIELD_TITLE: &str = "Title";
pub const FIELD_JOURNAL: &str = "Journal";
pub const FIELD_VOLUME: &str = "Vol";
pub const FIELD_NUMBER: &str = "Num";
pub const FIELD_PAGES: &str = "Pages";
pub const FIELD_BOOK_TITLE: &str = "Book_title";
pub const FIELD_INSTITUTION: &str = "Institution";
pub const FIELD_REFERENCE: &str = "Reference";
pub const FIELD_PARENCITE: &str = "parencite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    Article,
    BookChapter,
    TechnicalReport,
    Other,
}

impl PublicationType {
    pub fn from_entry_type(entry_type: &str) -> Self {
        match entry_type.to_ascii_lowercase().as_str() {
            "article" => Self::Article,
            "incollection" | "inproceedings" | "inbook" => Self::BookChapter,
            "techreport" => Self::TechnicalReport,
            _ => Self::Other,
        }
    }
}

/// First entry of a BibTeX document, with `@string` macros expanded.
pub fn first_entry(bibtex: &str) -> Result<Entry> {
    let bibliography = Bibliography::parse(bibtex)
        .map_err(|error| anyhow!("malformed BibTeX: {error:?}"))?;
    let Some(entry) = bibliography.iter().next() else {
        bail!("no BibTeX entry found");
    };
    Ok(entry.clone())
}

fn field_text(entry: &Entry, name: &str) -> Option<String> {
    entry
        .get(name)
        .map(|chunks| clean_latex(&chunks.format_verbatim()))
        .filter(|text| !text.is_empty())
}

/// `prefix name, suffix, given`, leaving out empty parts.
pub fn display_name(person: &Person) -> String {
    let family = [person.prefix.trim(), person.name.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    [family.as_str(), person.suffix.trim(), person.given_name.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .map(clean_latex)
        .collect::<Vec<_>>()
        .join(", ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn clean_latex(text: &str) -> String {
    let replaced = text
        .replace("{\\textquotesingle}", "'")
        .replace("{\\textemdash}", "-")
        .replace("{\\textendash}", "-")
        .replace("\\textquotesingle", "'")
        .replace("\\textemdash", "-")
        .replace("\\textendash", "-");
    let stripped = replaced
        .chars()
        .filter(|ch| !matches!(ch, '{' | '}' | '\\'))
        .collect::<String>();
    collapse_whitespace(&stripped)
}

/// Uppercase the first letter of every run of letters and lowercase the rest.
pub fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                titled.extend(ch.to_lowercase());
            } else {
                titled.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            titled.push(ch);
            in_word = false;
        }
    }
    titled
}

/// Short in-text citation: `(Smith, '20)`, `(Smith & J, '19)`, `(Smith ea, '18)`.
pub fn parenthetical_key<S: AsRef<str>>(last_names: &[S], year: &str) -> String {
    let short_year = year
        .char_indices()
        .rev()
        .nth(1)
        .map(|(index, _)| &year[index..])
        .unwrap_or(year);
    match last_names {
        [] => String::new(),
        [only] => format!("({}, '{short_year})", only.as_ref()),
        [first, second] => {
            let initial = second
                .as_ref()
                .chars()
                .next()
                .map(String::from)
                .unwrap_or_default();
            format!("({} & {initial}, '{short_year})", first.as_ref())
        }
        [first, ..] => format!("({} ea, '{short_year})", first.as_ref()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedReference {
    pub entry_type: String,
    pub publication_type: PublicationType,
    pub authors: String,
    pub author_last_names: Vec<String>,
    pub year: String,
    pub title: String,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub number: Option<String>,
    pub pages: Option<String>,
    pub book_title: Option<String>,
    pub institution: Option<String>,
    pub reference: String,
    pub parencite: String,
}

impl NormalizedReference {
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let mut put = |name: &str, value: &str| {
            fields.insert(name.to_string(), Value::String(value.to_string()));
        };
        put(FIELD_PUBLICATION_TYPE, &self.entry_type);
        put(FIELD_AUTHORS, &self.authors);
        put(FIELD_YEAR, &self.year);
        put(FIELD_TITLE, &self.title);
        match self.publication_type {
            PublicationType::Article => {
                put(FIELD_JOURNAL, self.journal.as_deref().unwrap_or_default());
                put(FIELD_VOLUME, self.volume.as_deref().unwrap_or_default());
                put(FIELD_NUMBER, self.number.as_deref().unwrap_or_default());
                put(FIELD_PAGES, self.pages.as_deref().unwrap_or_default());
            }
            PublicationType::BookChapter => {
                put(FIELD_BOOK_TITLE, self.book_title.as_deref().unwrap_or_default());
                put(FIELD_PAGES, self.pages.as_deref().unwrap_or_default());
            }
            PublicationType::TechnicalReport => {
                put(
                    FIELD_INSTITUTION,
                    self.institution.as_deref().unwrap_or_default(),
                );
            }
            PublicationType::Other => {}
        }
        put(FIELD_REFERENCE, &self.reference);
        put(FIELD_PARENCITE, &self.parencite);
        fields
    }
}

/// Derive reference fields from a BibTeX entry. `url`, when present, links the title inside the
/// formatted reference.
pub fn normalize(bibtex: &str, url: Option<&str>) -> Result<NormalizedReference> {
    let entry = first_entry(bibtex)?;
    let Some(title) = field_text(&entry, "title") else {
        bail!("BibTeX entry {} has no title", entry.key);
    };
    let persons = entry.author().unwrap_or_default();
    let authors = persons
        .iter()
        .map(display_name)
        .collect::<Vec<_>>()
        .join("; ");
    let author_last_names = persons
        .iter()
        .map(|person| clean_latex(&person.name))
        .collect::<Vec<_>>();
    let year = field_text(&entry, "year")
        .or_else(|| field_text(&entry, "date").map(|date| date.chars().take(4).collect()))
        .unwrap_or_default();
    let entry_type = entry.entry_type.to_string().to_ascii_lowercase();
    let publication_type = PublicationType::from_entry_type(&entry_type);

    let display_title = match url.filter(|url| !url.is_empty()) {
        Some(url) => format!("//[[{url}|{title}]]//"),
        None => format!("//{title}//"),
    };
    let plain = |name: &str| field_text(&entry, name);
    let titled = |name: &str| plain(name).map(|value| title_case(&value.to_lowercase()));

    let journal = titled("journal").or_else(|| titled("journaltitle"));
    let volume = plain("volume");
    let number = plain("number");
    let pages = plain("pages");
    let book_title = titled("booktitle");
    let institution = plain("institution");

    let reference = match publication_type {
        PublicationType::Article => format!(
            "{authors}, ({year}). {display_title}. {}, {}, {}, {}.",
            journal.as_deref().unwrap_or_default(),
            volume.as_deref().unwrap_or_default(),
            number.as_deref().unwrap_or_default(),
            pages.as_deref().unwrap_or_default(),
        ),
        PublicationType::BookChapter => format!(
            "{authors}, ({year}). {display_title}, {}. In: {}.",
            pages.as_deref().unwrap_or_default(),
            book_title.as_deref().unwrap_or_default(),
        ),
        PublicationType::TechnicalReport => format!(
            "{authors}, ({year}). {display_title}. {}.",
            institution.as_deref().unwrap_or_default(),
        ),
        PublicationType::Other => format!("{authors}, ({year}). {display_title}."),
    };
    let parencite = parenthetical_key(&author_last_names, &year);

    Ok(NormalizedReference {
        entry_type,
        publication_type,
        authors,
        author_last_names,
        year,
        title,
        journal,
        volume,
        number,
        pages,
        book_title,
        institution,
        reference,
        parencite,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        FIELD_JOURNAL, FIELD_PARENCITE, FIELD_REFERENCE, PublicationType, clean_latex,
        first_entry, normalize, parenthetical_key, title_case,
    };

    const ARTICLE: &str = r#"
@article{Karlan_2007,
  title = {Does Price Matter in Charitable Giving? Evidence from a Large-Scale Natural Field Experiment},
  volume = {97},
  number = {5},
  pages = {1774-1793},
  journal = "The {American} Economic Review",
  author = {Karlan, Dean and List, John A.},
  year = {2007},
}
"#;

    #[test]
    fn parenthetical_key_cases() {
        assert_eq!(parenthetical_key(&["Smith"], "2020"), "(Smith, '20)");
        assert_eq!(
            parenthetical_key(&["Smith", "Jones"], "2019"),
            "(Smith & J, '19)"
        );
        assert_eq!(
            parenthetical_key(&["Smith", "Jones", "Lee"], "2018"),
            "(Smith ea, '18)"
        );
        assert_eq!(parenthetical_key::<&str>(&[], "2018"), "");
    }

    #[test]
    fn first_entry_reads_key_and_type() {
        let entry = first_entry(ARTICLE).expect("parse");
        assert_eq!(entry.key, "Karlan_2007");
        assert_eq!(entry.entry_type.to_string().to_ascii_lowercase(), "article");
    }

    #[test]
    fn rejects_text_without_entries() {
        assert!(first_entry("no entries here").is_err());
        assert!(normalize("", None).is_err());
    }

    #[test]
    fn string_macros_expand_into_fields() {
        let reference = normalize(
            "@string{aer = \"American Economic Review\"}\n@article{k, author = {Smith, John}, title = {T}, journal = aer, volume = {9}, number = {2}, pages = {1-10}, year = {2019}}",
            None,
        )
        .expect("normalize");
        assert_eq!(reference.journal.as_deref(), Some("American Economic Review"));
        assert_eq!(
            reference.reference,
            "Smith, John, (2019). //T//. American Economic Review, 9, 2, 1-10."
        );
    }

    #[test]
    fn accented_names_keep_their_letters() {
        let reference = normalize(
            "@article{k, author = {Smith, John and {\\\"O}zdemir, Ali}, title = {Matching}, journal = {Economics Letters}, year = {2019}}",
            None,
        )
        .expect("normalize");
        assert_eq!(reference.authors, "Smith, John; Özdemir, Ali");
        assert_eq!(reference.author_last_names, vec!["Smith", "Özdemir"]);
        assert_eq!(reference.parencite, "(Smith & Ö, '19)");
    }

    #[test]
    fn name_forms() {
        let reference = normalize(
            "@misc{m, author = {van der Berg, Anna Maria and Ludwig van Beethoven and King, Jr, Martin Luther and {World Bank}}, title = {Names}, year = {2001}}",
            None,
        )
        .expect("normalize");
        assert_eq!(
            reference.authors,
            "van der Berg, Anna Maria; van Beethoven, Ludwig; King, Jr, Martin Luther; World Bank"
        );
        assert_eq!(
            reference.author_last_names,
            vec!["Berg", "Beethoven", "King", "World Bank"]
        );
        assert_eq!(reference.parencite, "(Berg ea, '01)");
    }

    #[test]
    fn normalizes_article() {
        let reference =
            normalize(ARTICLE, Some("https://doi.org/10.1257/aer.97.5.1774")).expect("normalize");
        assert_eq!(reference.publication_type, PublicationType::Article);
        assert_eq!(reference.authors, "Karlan, Dean; List, John A.");
        assert_eq!(reference.journal.as_deref(), Some("The American Economic Review"));
        assert_eq!(reference.parencite, "(Karlan & L, '07)");
        assert_eq!(
            reference.reference,
            "Karlan, Dean; List, John A., (2007). //[[https://doi.org/10.1257/aer.97.5.1774|Does Price Matter in Charitable Giving? Evidence from a Large-Scale Natural Field Experiment]]//. The American Economic Review, 97, 5, 1774-1793."
        );

        let fields = reference.to_fields();
        assert_eq!(fields[FIELD_PARENCITE], "(Karlan & L, '07)");
        assert_eq!(fields[FIELD_JOURNAL], "The American Economic Review");
        assert!(fields[FIELD_REFERENCE].as_str().is_some_and(|text| text.ends_with("1774-1793.")));
        assert!(!fields.contains_key("Institution"));
    }

    #[test]
    fn normalizes_chapter_report_and_other() {
        let chapter = normalize(
            "@incollection{c, author = {Andreoni, James}, title = {Philanthropy}, booktitle = {handbook of the ECONOMICS of giving}, pages = {1201-1269}, year = {2006}}",
            None,
        )
        .expect("chapter");
        assert_eq!(chapter.publication_type, PublicationType::BookChapter);
        assert_eq!(
            chapter.reference,
            "Andreoni, James, (2006). //Philanthropy//, 1201-1269. In: Handbook Of The Economics Of Giving."
        );
        assert_eq!(chapter.parencite, "(Andreoni, '06)");

        let report = normalize(
            "@techreport{r, author = {Smith, A. and Jones, B. and Lee, C.}, title = {Nudges}, institution = {NBER}, year = {2018}}",
            None,
        )
        .expect("report");
        assert_eq!(report.publication_type, PublicationType::TechnicalReport);
        assert_eq!(report.reference, "Smith, A.; Jones, B.; Lee, C., (2018). //Nudges//. NBER.");
        assert_eq!(report.parencite, "(Smith ea, '18)");

        let book = normalize("@book{b, author = {Doe, Jane}, title = {Giving}, year = {2010}}", None)
            .expect("book");
        assert_eq!(book.publication_type, PublicationType::Other);
        assert_eq!(book.reference, "Doe, Jane, (2010). //Giving//.");
    }

    #[test]
    fn year_falls_back_to_date() {
        let reference = normalize(
            "@online{o, author = {Doe, Jane}, title = {Giving Tuesday}, date = {2016-11-29}}",
            None,
        )
        .expect("normalize");
        assert_eq!(reference.year, "2016");
        assert_eq!(reference.parencite, "(Doe, '16)");
    }

    #[test]
    fn inproceedings_is_a_book_chapter() {
        assert_eq!(
            PublicationType::from_entry_type("InProceedings"),
            PublicationType::BookChapter
        );
    }

    #[test]
    fn missing_title_is_an_error() {
        assert!(normalize("@misc{x, author = {Doe, Jane}}", None).is_err());
    }

    #[test]
    fn latex_cleanup() {
        assert_eq!(
            clean_latex("Donors{\\textquotesingle} {\\textemdash} {Choice}"),
            "Donors' - Choice"
        );
        assert_eq!(clean_latex("{\\&} \\emph{bold}"), "& emphbold");
    }

    #[test]
    fn title_case_matches_word_starts() {
        assert_eq!(
            title_case("journal of economic behavior & organization"),
            "Journal Of Economic Behavior & Organization"
        );
        assert_eq!(title_case("o'neil's 3rd"), "O'Neil'S 3Rd");
    }
}
