use std::collections::HashMap;

/// One record of a tabular dataset, keyed by column name exactly as declared
/// in the header.
pub type Row = HashMap<String, String>;

/// Parse raw delimited text into a header and rows.
///
/// The first non-blank line is the header; every later non-blank line becomes
/// one row. Fields wrapped in double quotes may contain embedded commas.
/// Inputs with fewer than two non-blank lines yield an empty result rather
/// than an error.
pub fn parse(text: &str) -> (Vec<String>, Vec<Row>) {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.len() < 2 {
        return (Vec::new(), Vec::new());
    }

    let columns = split_fields(lines[0]);
    let mut rows = Vec::with_capacity(lines.len() - 1);

    for line in &lines[1..] {
        let fields = split_fields(line);
        let mut row = Row::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let value = fields.get(idx).cloned().unwrap_or_default();
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }

    (columns, rows)
}

/// Split one line on commas, honoring double-quoted fields. Surrounding quotes
/// are stripped; escaped-quote doubling is not interpreted.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);

    fields
        .into_iter()
        .map(|field| field.trim().trim_matches('"').trim().to_string())
        .collect()
}

/// Escape a single cell for CSV output: wrap in quotes when the value carries
/// a comma, quote, or newline.
pub fn escape_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_input_round_trips() {
        let text = "name,views,likes\nalpha,10,2\nbeta,30,5\ngamma,20,1\n";
        let (columns, rows) = parse(text);

        assert_eq!(columns, vec!["name", "views", "likes"]);
        assert_eq!(rows.len(), 3);

        let rendered: Vec<String> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| escape_cell(row.get(col).map(String::as_str).unwrap_or("")))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        assert_eq!(rendered, vec!["alpha,10,2", "beta,30,5", "gamma,20,1"]);
    }

    #[test]
    fn quoted_fields_keep_embedded_commas() {
        let text = "text,score\n\"hello, world\",4\nplain,2\n";
        let (_, rows) = parse(text);

        assert_eq!(rows[0].get("text").unwrap(), "hello, world");
        assert_eq!(rows[1].get("text").unwrap(), "plain");
    }

    #[test]
    fn missing_trailing_fields_become_empty() {
        let text = "a,b,c\n1,2\n";
        let (_, rows) = parse(text);
        assert_eq!(rows[0].get("c").unwrap(), "");
    }

    #[test]
    fn short_input_yields_empty_result() {
        assert_eq!(parse("only-a-header\n"), (Vec::new(), Vec::new()));
        assert_eq!(parse(""), (Vec::new(), Vec::new()));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let text = "a,b\n\n1,2\n\n3,4\n";
        let (_, rows) = parse(text);
        assert_eq!(rows.len(), 2);
    }
}
