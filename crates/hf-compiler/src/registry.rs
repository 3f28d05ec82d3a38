//! Parameter registry: one instance per compilation run.
//!
//! Every nuisance parameter, norm factor and its constraint term is created
//! here exactly once; a name seen again returns the existing instance. The
//! first request for a name decides its width and settings.
//!
//! Channels compiled concurrently each work in a private [`ParameterRegistry::scope`];
//! the driver merges scopes back with [`ParameterRegistry::commit`] in measurement
//! order, so the winner of every name is the same as in a sequential run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hf_ad::Scalar;
use hf_core::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

use crate::config::MeasurementSettings;

/// Name of the luminosity parameter.
pub const LUMI_NAME: &str = "Lumi";

/// Range of Alpha parameters.
const ALPHA_BOUNDS: (f64, f64) = (-5.0, 5.0);

/// Identity of a registry; models from different registries cannot be combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryId(u64);

impl RegistryId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RegistryId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a parameter does in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRole {
    /// Interpolation parameter centered at 0 (OverallSys, HistoSys).
    Alpha,
    /// Per-bin multiplicative factor centered at 1 (ShapeSys, StatError).
    Gamma,
    /// Free normalization factor.
    NormFactor,
    /// Free per-bin shape factor.
    ShapeFactor,
    /// Luminosity.
    Lumi,
}

/// Shape of a constraint term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Normal density.
    #[default]
    Gaussian,
    /// Barlow–Beeston auxiliary Poisson measurement.
    Poisson,
    /// Log-normal density.
    LogNormal,
    /// Flat within the parameter bounds.
    Uniform,
}

impl ConstraintKind {
    fn allowed_for(self, role: ParamRole) -> bool {
        match role {
            ParamRole::Alpha => matches!(self, ConstraintKind::Gaussian | ConstraintKind::Uniform),
            ParamRole::Gamma => true,
            ParamRole::Lumi => !matches!(self, ConstraintKind::Poisson),
            ParamRole::NormFactor | ParamRole::ShapeFactor => false,
        }
    }
}

/// Probability term tying a parameter to its global observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintTerm {
    /// Constrained parameter.
    pub parameter: String,
    /// Constraint shape.
    pub kind: ConstraintKind,
    /// Global observable name, `nom_<parameter>`.
    pub global_observable: String,
    /// Value of the global observable.
    pub global_value: f64,
    /// Center of the constraint.
    pub center: f64,
    /// Width (absolute for Gaussian, relative for Poisson and LogNormal).
    pub width: f64,
    /// Barlow–Beeston scale `1/width²` (Poisson only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tau: Option<f64>,
}

impl ConstraintTerm {
    fn new(parameter: &str, kind: ConstraintKind, center: f64, width: f64) -> Self {
        let tau = matches!(kind, ConstraintKind::Poisson).then(|| 1.0 / (width * width));
        let global_value = match tau {
            Some(t) => center * t,
            None => center,
        };
        Self {
            parameter: parameter.to_string(),
            kind,
            global_observable: format!("nom_{}", parameter),
            global_value,
            center,
            width,
            tau,
        }
    }

    /// Negative log-density of the constraint at parameter value `x`.
    pub fn nll<S: Scalar>(&self, x: S) -> Result<S> {
        match self.kind {
            ConstraintKind::Gaussian => hf_prob::normal::nll(x, self.global_value, self.width),
            ConstraintKind::Poisson => {
                let tau = self.tau.unwrap_or(1.0 / (self.width * self.width));
                let lambda = (x * S::from_f64(tau)).max_s(S::from_f64(crate::model::MIN_EXPECTED));
                Ok(hf_prob::poisson::nll(self.global_value, lambda))
            }
            ConstraintKind::LogNormal => hf_prob::lognormal::nll(x, self.global_value, self.width),
            ConstraintKind::Uniform => Ok(S::from_f64(0.0)),
        }
    }
}

/// A model parameter, identified by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name.
    pub name: String,
    /// Role.
    pub role: ParamRole,
    /// Initial value.
    pub init: f64,
    /// Allowed range.
    pub bounds: (f64, f64),
    /// Held constant.
    pub fixed: bool,
    /// Requested constraint shape, kept even when no term was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConstraintKind>,
    /// Constraint term, if constrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ConstraintTerm>,
}

/// Request for a constrained parameter.
#[derive(Debug, Clone, Copy)]
pub struct ConstrainedRequest<'a> {
    /// Parameter name.
    pub name: &'a str,
    /// Systematic the parameter belongs to (used for override lookup).
    pub group: Option<&'a str>,
    /// Role (Alpha or Gamma).
    pub role: ParamRole,
    /// Requested constraint shape.
    pub kind: ConstraintKind,
    /// Requested width; ignored if the parameter already exists.
    pub width: f64,
    /// Zero width fixes the parameter at its center instead of leaving it free.
    pub fix_if_degenerate: bool,
}

impl<'a> ConstrainedRequest<'a> {
    /// Unit-width Gaussian Alpha parameter.
    pub fn alpha(name: &'a str) -> Self {
        Self {
            name,
            group: None,
            role: ParamRole::Alpha,
            kind: ConstraintKind::Gaussian,
            width: 1.0,
            fix_if_degenerate: true,
        }
    }

    /// Gamma parameter belonging to systematic `group`.
    pub fn gamma(name: &'a str, group: &'a str, kind: ConstraintKind, width: f64) -> Self {
        Self {
            name,
            group: Some(group),
            role: ParamRole::Gamma,
            kind,
            width,
            fix_if_degenerate: true,
        }
    }

    /// Set the degenerate-width policy.
    pub fn fix_if_degenerate(mut self, fix: bool) -> Self {
        self.fix_if_degenerate = fix;
        self
    }
}

/// Request for an unconstrained parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeRequest<'a> {
    /// Parameter name.
    pub name: &'a str,
    /// Role (NormFactor or ShapeFactor).
    pub role: ParamRole,
    /// Initial value.
    pub init: f64,
    /// Range.
    pub bounds: (f64, f64),
    /// Held constant.
    pub constant: bool,
}

#[derive(Debug, Default)]
struct Entries {
    by_name: HashMap<String, Parameter>,
    order: Vec<String>,
}

impl Entries {
    fn add(&mut self, param: Parameter) {
        self.order.push(param.name.clone());
        self.by_name.insert(param.name.clone(), param);
    }
}

/// Registry of all parameters created during one compilation run.
#[derive(Debug)]
pub struct ParameterRegistry {
    id: RegistryId,
    settings: Arc<MeasurementSettings>,
    inner: Mutex<Entries>,
}

impl ParameterRegistry {
    /// Empty registry bound to `settings`.
    pub fn new(settings: Arc<MeasurementSettings>) -> Self {
        Self { id: RegistryId::next(), settings, inner: Mutex::new(Entries::default()) }
    }

    /// Registry identity.
    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Measurement settings this registry applies.
    pub fn settings(&self) -> &Arc<MeasurementSettings> {
        &self.settings
    }

    /// Empty registry with the same identity and settings.
    ///
    /// Parameters created in a scope stay private to it until committed.
    pub fn scope(&self) -> Self {
        Self { id: self.id, settings: self.settings.clone(), inner: Mutex::new(Entries::default()) }
    }

    /// Merge the parameters created in `scope`, in their creation order.
    ///
    /// Names already registered keep their existing instance and must agree
    /// on role, constraint kind and (for free parameters) range, initial value
    /// and constancy. On conflict nothing from `scope` is merged.
    pub fn commit(&self, scope: ParameterRegistry) -> Result<()> {
        if scope.id != self.id {
            return Err(Error::Computation("cannot commit a scope of another registry".into()));
        }
        let staged = scope
            .inner
            .into_inner()
            .map_err(|_| Error::Computation("parameter registry mutex poisoned".into()))?;
        let mut entries = self.lock()?;
        for name in &staged.order {
            if let (Some(existing), Some(param)) = (entries.by_name.get(name), staged.by_name.get(name)) {
                check_compatible(existing, param)?;
            }
        }
        let Entries { mut by_name, order } = staged;
        for name in order {
            if entries.by_name.contains_key(&name) {
                continue;
            }
            if let Some(param) = by_name.remove(&name) {
                entries.add(param);
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        self.inner
            .lock()
            .map_err(|_| Error::Computation("parameter registry mutex poisoned".into()))
    }

    /// Get or create a constrained parameter.
    ///
    /// An existing parameter is returned unchanged when role and constraint
    /// kind agree with the request; any disagreement is a configuration error.
    pub fn resolve_constrained(&self, req: ConstrainedRequest<'_>) -> Result<Parameter> {
        let ovr = self
            .settings
            .constraint_overrides
            .get(req.name)
            .or_else(|| req.group.and_then(|g| self.settings.constraint_overrides.get(g)));
        let kind = ovr.map_or(req.kind, |o| o.kind);
        let ctx = || ErrorContext::systematic(req.name);

        if !kind.allowed_for(req.role) {
            return Err(Error::config(
                ctx(),
                format!("{:?} constraint is not valid for a {:?} parameter", kind, req.role),
            ));
        }

        let mut entries = self.lock()?;
        if let Some(existing) = entries.by_name.get(req.name) {
            check_same(existing, req.role, Some(kind))?;
            return Ok(existing.clone());
        }

        let center = match req.role {
            ParamRole::Alpha => 0.0,
            _ => 1.0,
        };
        let width = match (req.role, ovr.and_then(|o| o.rel_uncertainty)) {
            (ParamRole::Gamma, Some(rel)) => rel,
            _ => req.width,
        };
        if !width.is_finite() || width < 0.0 {
            return Err(Error::config(ctx(), format!("constraint width must be >= 0, got {}", width)));
        }

        let bounds = match req.role {
            ParamRole::Alpha => ALPHA_BOUNDS,
            _ => (0.0, (1.0 + 5.0 * width).max(10.0)),
        };

        let degenerate = width == 0.0;
        let constraint = (!degenerate).then(|| ConstraintTerm::new(req.name, kind, center, width));
        let param = Parameter {
            name: req.name.to_string(),
            role: req.role,
            init: self.settings.param_values.get(req.name).copied().unwrap_or(center),
            bounds,
            fixed: (degenerate && req.fix_if_degenerate)
                || self.settings.const_params.contains(req.name),
            kind: Some(kind),
            constraint,
        };
        log::debug!(
            "registered {:?} parameter '{}' ({:?}, width {})",
            param.role,
            param.name,
            kind,
            width
        );
        entries.add(param.clone());
        Ok(param)
    }

    /// Get or create an unconstrained parameter.
    ///
    /// Two requests for the same name must agree on role, initial value,
    /// range and constancy.
    pub fn resolve_free(&self, req: FreeRequest<'_>) -> Result<Parameter> {
        let ctx = || ErrorContext::systematic(req.name);
        if !(req.bounds.0 <= req.init && req.init <= req.bounds.1) {
            return Err(Error::config(
                ctx(),
                format!("initial value {} outside range [{}, {}]", req.init, req.bounds.0, req.bounds.1),
            ));
        }

        let mut entries = self.lock()?;
        if let Some(existing) = entries.by_name.get(req.name) {
            check_same(existing, req.role, None)?;
            if existing.bounds != req.bounds || existing.fixed != (req.constant || self.is_const(req.name)) {
                return Err(Error::config(
                    ctx(),
                    format!(
                        "conflicting settings: range [{}, {}] vs [{}, {}]",
                        existing.bounds.0, existing.bounds.1, req.bounds.0, req.bounds.1
                    ),
                ));
            }
            let requested_init = self.settings.param_values.get(req.name).copied().unwrap_or(req.init);
            if existing.init != requested_init {
                return Err(Error::config(
                    ctx(),
                    format!("conflicting initial values {} and {}", existing.init, requested_init),
                ));
            }
            return Ok(existing.clone());
        }

        let param = Parameter {
            name: req.name.to_string(),
            role: req.role,
            init: self.settings.param_values.get(req.name).copied().unwrap_or(req.init),
            bounds: req.bounds,
            fixed: req.constant || self.is_const(req.name),
            kind: None,
            constraint: None,
        };
        log::debug!("registered free {:?} parameter '{}'", param.role, param.name);
        entries.add(param.clone());
        Ok(param)
    }

    /// Get or create the luminosity parameter.
    ///
    /// Fixed at the nominal luminosity when its relative uncertainty is 0.
    pub fn resolve_lumi(&self) -> Result<Parameter> {
        let s = &self.settings;
        let ovr = s.constraint_overrides.get(LUMI_NAME);
        let kind = ovr.map_or(ConstraintKind::Gaussian, |o| o.kind);
        if !kind.allowed_for(ParamRole::Lumi) {
            return Err(Error::config(
                ErrorContext::systematic(LUMI_NAME),
                format!("{:?} constraint is not valid for the luminosity", kind),
            ));
        }

        let mut entries = self.lock()?;
        if let Some(existing) = entries.by_name.get(LUMI_NAME) {
            check_same(existing, ParamRole::Lumi, Some(kind))?;
            return Ok(existing.clone());
        }

        let rel = ovr.and_then(|o| o.rel_uncertainty).unwrap_or(s.lumi_rel_err);
        let constraint = (rel > 0.0).then(|| {
            let width = match kind {
                ConstraintKind::Gaussian => s.lumi * rel,
                _ => rel,
            };
            ConstraintTerm::new(LUMI_NAME, kind, s.lumi, width)
        });
        let param = Parameter {
            name: LUMI_NAME.to_string(),
            role: ParamRole::Lumi,
            init: s.param_values.get(LUMI_NAME).copied().unwrap_or(s.lumi),
            bounds: (0.0, 10.0 * s.lumi),
            fixed: rel == 0.0 || self.is_const(LUMI_NAME),
            kind: Some(kind),
            constraint,
        };
        entries.add(param.clone());
        Ok(param)
    }

    fn is_const(&self, name: &str) -> bool {
        self.settings.const_params.contains(name)
    }

    /// Registered parameter by name.
    pub fn get(&self, name: &str) -> Result<Option<Parameter>> {
        Ok(self.lock()?.by_name.get(name).cloned())
    }

    /// All registered parameters, sorted by name.
    pub fn snapshot(&self) -> Result<Vec<Parameter>> {
        let mut all: Vec<Parameter> = self.lock()?.by_name.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Number of registered parameters.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.order.len())
    }

    /// Whether no parameter has been registered.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.order.is_empty())
    }
}

fn check_same(existing: &Parameter, role: ParamRole, kind: Option<ConstraintKind>) -> Result<()> {
    if existing.role != role {
        return Err(Error::config(
            ErrorContext::systematic(existing.name.clone()),
            format!("used as {:?} but already registered as {:?}", role, existing.role),
        ));
    }
    if existing.kind != kind {
        return Err(Error::config(
            ErrorContext::systematic(existing.name.clone()),
            format!(
                "constraint kind {:?} conflicts with registered {:?}",
                kind, existing.kind
            ),
        ));
    }
    Ok(())
}

fn check_compatible(existing: &Parameter, staged: &Parameter) -> Result<()> {
    check_same(existing, staged.role, staged.kind)?;
    if staged.kind.is_none()
        && (existing.bounds != staged.bounds || existing.fixed != staged.fixed || existing.init != staged.init)
    {
        return Err(Error::config(
            ErrorContext::systematic(existing.name.clone()),
            format!(
                "conflicting settings: range [{}, {}] init {} vs range [{}, {}] init {}",
                existing.bounds.0,
                existing.bounds.1,
                existing.init,
                staged.bounds.0,
                staged.bounds.1,
                staged.init
            ),
        ));
    }
    Ok(())
}

/// Ordered parameter list with a name index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Parameter>", into = "Vec<Parameter>")]
pub struct ParameterTable {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl From<Vec<Parameter>> for ParameterTable {
    fn from(params: Vec<Parameter>) -> Self {
        let mut table = Self::default();
        for p in params {
            table.insert(p);
        }
        table
    }
}

impl From<ParameterTable> for Vec<Parameter> {
    fn from(table: ParameterTable) -> Self {
        table.params
    }
}

impl ParameterTable {
    /// Insert a parameter if its name is new; returns its index either way.
    pub fn insert(&mut self, param: Parameter) -> usize {
        if let Some(&i) = self.index.get(&param.name) {
            return i;
        }
        let i = self.params.len();
        self.index.insert(param.name.clone(), i);
        self.params.push(param);
        i
    }

    /// Index of a parameter.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Parameter by name.
    pub fn by_name(&self, name: &str) -> Option<&Parameter> {
        self.index_of(name).map(|i| &self.params[i])
    }

    /// Parameter at index `i`.
    pub fn get(&self, i: usize) -> Option<&Parameter> {
        self.params.get(i)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    /// Names in order.
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Bounds in order; fixed parameters are pinned to their initial value.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| if p.fixed { (p.init, p.init) } else { p.bounds }).collect()
    }

    /// Initial values in order.
    pub fn inits(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    /// Replace every parameter by the registry's instance of the same name.
    pub fn refresh_from(&mut self, registry: &ParameterRegistry) -> Result<()> {
        for param in &mut self.params {
            *param = registry.get(&param.name)?.ok_or_else(|| {
                Error::Computation(format!("parameter '{}' is not registered", param.name))
            })?;
        }
        Ok(())
    }

    /// `(index, term)` for every constrained parameter.
    pub fn constraints(&self) -> impl Iterator<Item = (usize, &ConstraintTerm)> {
        self.params.iter().enumerate().filter_map(|(i, p)| p.constraint.as_ref().map(|c| (i, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn registry() -> ParameterRegistry {
        ParameterRegistry::new(Arc::new(MeasurementSettings::default()))
    }

    #[test]
    fn test_same_name_same_instance() {
        let reg = registry();
        let a = reg.resolve_constrained(ConstrainedRequest::alpha("JES")).unwrap();
        let b = reg.resolve_constrained(ConstrainedRequest::alpha("JES")).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len().unwrap(), 1);
        let c = a.constraint.unwrap();
        assert_eq!(c.global_observable, "nom_JES");
        assert_eq!((c.center, c.width), (0.0, 1.0));
    }

    #[test]
    fn test_width_ignored_on_reuse() {
        let reg = registry();
        let first = reg
            .resolve_constrained(ConstrainedRequest::gamma("s_bin0", "s", ConstraintKind::Gaussian, 0.1))
            .unwrap();
        let second = reg
            .resolve_constrained(ConstrainedRequest::gamma("s_bin0", "s", ConstraintKind::Gaussian, 0.5))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.constraint.unwrap().width, 0.1);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let reg = registry();
        reg.resolve_constrained(ConstrainedRequest::gamma("g_bin0", "g", ConstraintKind::Gaussian, 0.1))
            .unwrap();
        let err = reg
            .resolve_constrained(ConstrainedRequest::gamma("g_bin0", "g", ConstraintKind::Poisson, 0.1))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.context().and_then(|c| c.systematic.as_deref()), Some("g_bin0"));
    }

    #[test]
    fn test_role_mismatch_is_rejected() {
        let reg = registry();
        reg.resolve_constrained(ConstrainedRequest::alpha("mu")).unwrap();
        let err = reg
            .resolve_free(FreeRequest {
                name: "mu",
                role: ParamRole::NormFactor,
                init: 1.0,
                bounds: (0.0, 10.0),
                constant: false,
            })
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_poisson_constraint() {
        let reg = registry();
        let p = reg
            .resolve_constrained(ConstrainedRequest::gamma("b_bin0", "b", ConstraintKind::Poisson, 0.2))
            .unwrap();
        let c = p.constraint.unwrap();
        assert_relative_eq!(c.tau.unwrap(), 25.0, epsilon = 1e-12);
        assert_relative_eq!(c.global_value, 25.0, epsilon = 1e-12);

        let at_center: f64 = c.nll(1.0).unwrap();
        let off: f64 = c.nll(1.3).unwrap();
        assert!(off > at_center);
    }

    #[test]
    fn test_degenerate_gamma_policy() {
        let reg = registry();
        let fixed = reg
            .resolve_constrained(ConstrainedRequest::gamma("z_bin0", "z", ConstraintKind::Gaussian, 0.0))
            .unwrap();
        assert!(fixed.fixed);
        assert!(fixed.constraint.is_none());
        assert_eq!(fixed.init, 1.0);

        let free = reg
            .resolve_constrained(
                ConstrainedRequest::gamma("z_bin1", "z", ConstraintKind::Gaussian, 0.0)
                    .fix_if_degenerate(false),
            )
            .unwrap();
        assert!(!free.fixed);
        assert!(free.constraint.is_none());
    }

    #[test]
    fn test_override_by_group_and_settings() {
        let mut settings = MeasurementSettings::default();
        settings.constraint_overrides.insert(
            "shape".into(),
            crate::measurement::ConstraintOverride {
                kind: ConstraintKind::LogNormal,
                rel_uncertainty: Some(0.3),
            },
        );
        settings.param_values = BTreeMap::from([("mu".to_string(), 2.0)]);
        settings.const_params.insert("JES".into());
        let reg = ParameterRegistry::new(Arc::new(settings));

        let g = reg
            .resolve_constrained(ConstrainedRequest::gamma("shape_bin3", "shape", ConstraintKind::Poisson, 0.1))
            .unwrap();
        assert_eq!(g.kind, Some(ConstraintKind::LogNormal));
        assert_eq!(g.constraint.unwrap().width, 0.3);

        let jes = reg.resolve_constrained(ConstrainedRequest::alpha("JES")).unwrap();
        assert!(jes.fixed);

        let mu = reg
            .resolve_free(FreeRequest {
                name: "mu",
                role: ParamRole::NormFactor,
                init: 1.0,
                bounds: (0.0, 10.0),
                constant: false,
            })
            .unwrap();
        assert_eq!(mu.init, 2.0);
    }

    #[test]
    fn test_alpha_rejects_poisson_override() {
        let mut settings = MeasurementSettings::default();
        settings.constraint_overrides.insert(
            "JES".into(),
            crate::measurement::ConstraintOverride { kind: ConstraintKind::Poisson, rel_uncertainty: None },
        );
        let reg = ParameterRegistry::new(Arc::new(settings));
        assert!(reg.resolve_constrained(ConstrainedRequest::alpha("JES")).is_err());
    }

    #[test]
    fn test_conflicting_norm_factor() {
        let reg = registry();
        let req = FreeRequest {
            name: "mu",
            role: ParamRole::NormFactor,
            init: 1.0,
            bounds: (0.0, 10.0),
            constant: false,
        };
        reg.resolve_free(req).unwrap();
        assert!(reg.resolve_free(req).is_ok());
        let err = reg.resolve_free(FreeRequest { bounds: (0.0, 5.0), ..req }).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_lumi() {
        let settings = MeasurementSettings { lumi: 2.0, lumi_rel_err: 0.05, ..Default::default() };
        let reg = ParameterRegistry::new(Arc::new(settings));
        let lumi = reg.resolve_lumi().unwrap();
        assert!(!lumi.fixed);
        assert_eq!(lumi.bounds, (0.0, 20.0));
        let c = lumi.constraint.unwrap();
        assert_relative_eq!(c.width, 0.1, epsilon = 1e-12);
        assert_eq!(c.center, 2.0);

        let fixed = registry().resolve_lumi().unwrap();
        assert!(fixed.fixed);
        assert!(fixed.constraint.is_none());
    }

    #[test]
    fn test_concurrent_resolution_creates_one_instance() {
        use rayon::prelude::*;
        let reg = registry();
        let all: Vec<Parameter> = (0..64)
            .into_par_iter()
            .map(|_| reg.resolve_constrained(ConstrainedRequest::alpha("shared")).unwrap())
            .collect();
        assert!(all.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(reg.len().unwrap(), 1);
    }

    #[test]
    fn test_commit_order_decides_winner() {
        let reg = registry();
        let first = reg.scope();
        let second = reg.scope();
        second
            .resolve_constrained(ConstrainedRequest::gamma("bb_bin0", "bb", ConstraintKind::Gaussian, 0.4))
            .unwrap();
        first
            .resolve_constrained(ConstrainedRequest::gamma("bb_bin0", "bb", ConstraintKind::Gaussian, 0.1))
            .unwrap();
        first.resolve_constrained(ConstrainedRequest::alpha("JES")).unwrap();

        reg.commit(first).unwrap();
        reg.commit(second).unwrap();
        let bb = reg.get("bb_bin0").unwrap().unwrap();
        assert_eq!(bb.constraint.unwrap().width, 0.1);
        assert_eq!(reg.len().unwrap(), 2);
    }

    #[test]
    fn test_conflicting_commit_merges_nothing() {
        let reg = registry();
        reg.resolve_constrained(ConstrainedRequest::alpha("JES")).unwrap();
        let scope = reg.scope();
        scope.resolve_constrained(ConstrainedRequest::alpha("other")).unwrap();
        scope
            .resolve_free(FreeRequest {
                name: "JES",
                role: ParamRole::NormFactor,
                init: 1.0,
                bounds: (0.0, 10.0),
                constant: false,
            })
            .unwrap();
        let err = reg.commit(scope).unwrap_err();
        assert!(err.is_configuration());
        assert!(reg.get("other").unwrap().is_none());

        let foreign = registry();
        assert!(matches!(reg.commit(foreign), Err(Error::Computation(_))));
    }

    #[test]
    fn test_table_refresh_takes_registered_instance() {
        let reg = registry();
        reg.resolve_constrained(ConstrainedRequest::gamma("g_bin0", "g", ConstraintKind::Poisson, 0.2))
            .unwrap();
        let scope = reg.scope();
        let mut table = ParameterTable::default();
        table.insert(
            scope
                .resolve_constrained(ConstrainedRequest::gamma("g_bin0", "g", ConstraintKind::Poisson, 0.5))
                .unwrap(),
        );
        reg.commit(scope).unwrap();
        table.refresh_from(&reg).unwrap();
        assert_eq!(table.by_name("g_bin0").unwrap().constraint.as_ref().unwrap().width, 0.2);
    }

    #[test]
    fn test_registry_ids_are_unique() {
        assert_ne!(registry().id(), registry().id());
    }

    #[test]
    fn test_table_serde_roundtrip_keeps_index() {
        let reg = registry();
        let mut table = ParameterTable::default();
        table.insert(reg.resolve_constrained(ConstrainedRequest::alpha("a")).unwrap());
        table.insert(reg.resolve_lumi().unwrap());
        let json = serde_json::to_string(&table).unwrap();
        let back: ParameterTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_of("Lumi"), Some(1));
        assert_eq!(back.bounds()[1], (1.0, 1.0));
    }
}
