use common::error::AppError;

use crate::entry::FaqEntry;

const LIST_SEPARATOR: &str = "##";
const HEADER: &[&str] = &[
    "category",
    "standard_question",
    "similar_questions",
    "negative_questions",
    "answers",
    "reply_all",
    "disabled",
    "forbid_recommendation",
];

fn split_list(field: &str) -> Vec<String> {
    if field.is_empty() {
        return Vec::new();
    }
    field.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn join_list(items: &[String]) -> String {
    items.join(LIST_SEPARATOR)
}

fn parse_bool(field: &str) -> bool {
    field.eq_ignore_ascii_case("true")
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Writes `entries` as the fixed 8-column FAQ export format.
pub fn write_csv(entries: &[FaqEntry]) -> Result<String, AppError> {
    let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
    writer
        .write_record(HEADER)
        .map_err(|e| AppError::InternalError(format!("csv write header: {e}")))?;

    for entry in entries {
        writer
            .write_record([
                entry.category.clone().unwrap_or_default(),
                entry.standard_question.clone(),
                join_list(&entry.similar_questions),
                join_list(&entry.negative_questions),
                join_list(&entry.answers),
                format_bool(entry.reply_all).to_string(),
                format_bool(entry.disabled).to_string(),
                format_bool(entry.forbid_recommendation).to_string(),
            ])
            .map_err(|e| AppError::InternalError(format!("csv write row: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("csv finalize: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppError::InternalError(format!("csv utf8: {e}")))
}

/// Parses the fixed 8-column FAQ import format. Rejects files with a
/// mismatched header or short rows rather than silently misaligning columns.
pub fn read_csv(data: &str) -> Result<Vec<FaqEntry>, AppError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(data.as_bytes());

    {
        let headers = reader
            .headers()
            .map_err(|e| AppError::Validation(format!("invalid csv header: {e}")))?;
        if headers.iter().collect::<Vec<_>>() != HEADER {
            return Err(AppError::Validation(
                "FAQ csv header does not match the expected 8-column format".into(),
            ));
        }
    }

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::Validation(format!("invalid csv row: {e}")))?;
        if record.len() != HEADER.len() {
            return Err(AppError::Validation(format!(
                "expected {} columns, found {}",
                HEADER.len(),
                record.len()
            )));
        }

        let category = record.get(0).filter(|s| !s.is_empty()).map(str::to_string);
        let standard_question = record.get(1).unwrap_or_default().to_string();
        let similar_questions = split_list(record.get(2).unwrap_or_default());
        let negative_questions = split_list(record.get(3).unwrap_or_default());
        let answers = split_list(record.get(4).unwrap_or_default());
        let reply_all = parse_bool(record.get(5).unwrap_or_default());
        let disabled = parse_bool(record.get(6).unwrap_or_default());
        let forbid_recommendation = parse_bool(record.get(7).unwrap_or_default());

        entries.push(FaqEntry {
            category,
            standard_question,
            similar_questions,
            negative_questions,
            answers,
            reply_all,
            disabled,
            forbid_recommendation,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> FaqEntry {
        FaqEntry {
            category: Some("billing".into()),
            standard_question: "how do I reset my password".into(),
            similar_questions: vec!["forgot password".into(), "lost password".into()],
            negative_questions: vec!["what is my password".into()],
            answers: vec!["go to account settings".into()],
            reply_all: true,
            disabled: false,
            forbid_recommendation: false,
        }
    }

    #[test]
    fn round_trips_through_csv() {
        let entries = vec![sample_entry()];
        let csv = write_csv(&entries).unwrap();
        let parsed = read_csv(&csv).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn rejects_mismatched_header() {
        let bad = "a,b,c\n1,2,3\n";
        assert!(read_csv(bad).is_err());
    }

    #[test]
    fn empty_list_fields_roundtrip_as_empty_vecs() {
        let mut entry = sample_entry();
        entry.similar_questions = vec![];
        entry.negative_questions = vec![];
        let csv = write_csv(&[entry.clone()]).unwrap();
        let parsed = read_csv(&csv).unwrap();
        assert_eq!(parsed[0].similar_questions, Vec::<String>::new());
        assert_eq!(parsed[0].negative_questions, Vec::<String>::new());
    }
}
