//! Post-fit reporting.

use std::io::Write;

use hf_core::{Error, FitResult, Result};

fn latex_escape(s: &str) -> String {
    s.replace('\\', "\\textbackslash{}").replace('_', "\\_").replace('&', "\\&").replace('%', "\\%")
}

/// Write the fit correlation matrix as a LaTeX table.
///
/// `names` selects and orders the rows; an empty slice selects every
/// parameter with a positive uncertainty.
pub fn write_correlation_table<W: Write>(result: &FitResult, names: &[String], writer: &mut W) -> Result<()> {
    if result.covariance.is_none() {
        return Err(Error::Validation("fit result has no covariance matrix".into()));
    }

    let indices: Vec<usize> = if names.is_empty() {
        (0..result.parameters.len())
            .filter(|&i| result.uncertainties.get(i).is_some_and(|&s| s > 0.0))
            .collect()
    } else {
        names
            .iter()
            .map(|n| {
                result
                    .index_of(n)
                    .ok_or_else(|| Error::Validation(format!("fit result has no parameter '{}'", n)))
            })
            .collect::<Result<_>>()?
    };

    writeln!(writer, "\\begin{{table}}[ht]")?;
    writeln!(writer, "\\centering")?;
    writeln!(writer, "\\begin{{tabular}}{{l|{}}}", "c".repeat(indices.len()))?;
    let header: Vec<String> =
        indices.iter().map(|&i| latex_escape(&result.parameter_names[i])).collect();
    writeln!(writer, " & {} \\\\", header.join(" & "))?;
    writeln!(writer, "\\hline")?;
    for &i in &indices {
        let cells: Vec<String> = indices
            .iter()
            .map(|&j| match result.correlation(i, j) {
                Some(c) => format!("{:.2}", c),
                None => "--".to_string(),
            })
            .collect();
        writeln!(writer, "{} & {} \\\\", latex_escape(&result.parameter_names[i]), cells.join(" & "))?;
    }
    writeln!(writer, "\\end{{tabular}}")?;
    writeln!(writer, "\\caption{{Fit correlation matrix}}")?;
    writeln!(writer, "\\end{{table}}")?;
    Ok(())
}
