use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use larder_adapt::SourceRow;
use larder_core::AdapterError;

/// Reads one JSON-lines input file. Blank lines are skipped. A line that is
/// not a valid row becomes an [`AdapterError`] located at `file:line` so the
/// run can report it as a residual and carry on.
pub fn read_source_rows(path: &Path) -> io::Result<Vec<Result<SourceRow, AdapterError>>> {
    let file = File::open(path)?;
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let location = format!("{label}:{}", idx + 1);
        let row = match serde_json::from_str::<SourceRow>(&line) {
            Ok(mut row) => {
                if row.row_ref.trim().is_empty() {
                    row.row_ref = location;
                }
                Ok(row)
            }
            Err(err) => Err(AdapterError::new(
                label.as_str(),
                location,
                format!("malformed source row: {err}"),
            )),
        };
        rows.push(row);
    }

    Ok(rows)
}
