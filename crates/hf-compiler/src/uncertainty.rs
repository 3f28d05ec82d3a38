//! Per-bin uncertainty histograms feeding ShapeSys/StatError constraint widths.

use hf_core::{Error, ErrorContext, Result};

use crate::histogram::Histogram;

/// Combine `(nominal, absolute uncertainty)` pairs into one relative-uncertainty
/// histogram: `sqrt(Σ σ²) / Σ nominal` per bin.
///
/// Bins whose summed nominal is not positive get a relative uncertainty of 0.
/// All histograms must share the binning of the first nominal.
pub fn relative_uncertainty(
    name: &str,
    pairs: &[(&Histogram, &Histogram)],
) -> Result<Histogram> {
    let Some((first, _)) = pairs.first() else {
        return Err(Error::Validation(format!(
            "relative uncertainty '{}' needs at least one histogram pair",
            name
        )));
    };

    let n_bins = first.n_bins();
    let mut sum_nominal = vec![0.0; n_bins];
    let mut sum_sigma_sq = vec![0.0; n_bins];

    for (nominal, sigma) in pairs {
        for h in [*nominal, *sigma] {
            if !h.same_binning(first) {
                return Err(Error::config(
                    ErrorContext::systematic(name),
                    format!(
                        "histogram '{}' binning does not match '{}'",
                        h.name, first.name
                    ),
                ));
            }
        }
        for i in 0..n_bins {
            sum_nominal[i] += nominal.content(i);
            sum_sigma_sq[i] += sigma.content(i) * sigma.content(i);
        }
    }

    let contents = sum_nominal
        .iter()
        .zip(&sum_sigma_sq)
        .map(|(&nom, &sq)| if nom > 0.0 { sq.sqrt() / nom } else { 0.0 })
        .collect();

    Histogram::new(name, first.axes.clone(), contents)
}

/// Absolute per-bin uncertainty of `nominal` taken from its own statistical
/// error (`sqrt(sumw2)`, or `sqrt(|content|)` when no weights were recorded).
pub fn absolute_uncertainty(name: &str, nominal: &Histogram) -> Histogram {
    Histogram {
        name: name.to_string(),
        axes: nominal.axes.clone(),
        contents: nominal.errors(),
        sumw2: None,
    }
}

/// Absolute uncertainty from a relative-uncertainty histogram: `rel_i * nominal_i`.
pub fn scale_relative(name: &str, nominal: &Histogram, relative: &Histogram) -> Result<Histogram> {
    relative
        .validate()
        .map_err(|e| Error::config(ErrorContext::systematic(name), e.to_string()))?;
    if !relative.same_binning(nominal) {
        return Err(Error::config(
            ErrorContext::systematic(name),
            format!(
                "relative-uncertainty histogram '{}' binning does not match nominal '{}'",
                relative.name, nominal.name
            ),
        ));
    }
    let contents = nominal
        .contents
        .iter()
        .zip(&relative.contents)
        .map(|(n, r)| r * n)
        .collect();
    Ok(Histogram { name: name.to_string(), axes: nominal.axes.clone(), contents, sumw2: None })
}
