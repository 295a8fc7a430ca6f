use std::collections::HashMap;
use std::path::Path;

use layoutqp_solver::{ConstraintOp, LinearSpec, SolverOptions, SpecError, VariableId};
use serde::Deserialize;
use thiserror::Error;

/// JSON description of a specification
#[derive(Debug, Deserialize)]
pub struct ModelFile {
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

#[derive(Debug, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ConstraintDef {
    pub label: Option<String>,
    pub terms: Vec<TermDef>,
    pub op: ConstraintOp,
    pub rhs: f64,
    #[serde(default)]
    pub penalty_neg: f64,
    #[serde(default)]
    pub penalty_pos: f64,
}

#[derive(Debug, Deserialize)]
pub struct TermDef {
    pub coeff: f64,
    pub var: String,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cannot read model: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("variable '{0}' is declared twice")]
    DuplicateVariable(String),
    #[error("constraint {index} references unknown variable '{name}'")]
    UnknownVariable { index: usize, name: String },
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// A built specification with its variables by name, in declaration order
pub struct LoadedModel {
    pub spec: LinearSpec,
    pub variables: Vec<(String, VariableId)>,
}

impl LoadedModel {
    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.variables.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }
}

impl ModelFile {
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn build(&self, options: SolverOptions) -> Result<LoadedModel, ModelError> {
        let mut spec = LinearSpec::with_options(options);
        let mut by_name: HashMap<&str, VariableId> = HashMap::new();
        let mut variables = Vec::with_capacity(self.variables.len());

        for def in &self.variables {
            if by_name.contains_key(def.name.as_str()) {
                return Err(ModelError::DuplicateVariable(def.name.clone()));
            }
            let id = spec.add_named_variable(def.name.clone());
            if let Some(min) = def.min {
                spec.set_min(id, min)?;
            }
            if let Some(max) = def.max {
                spec.set_max(id, max)?;
            }
            by_name.insert(&def.name, id);
            variables.push((def.name.clone(), id));
        }

        for (index, def) in self.constraints.iter().enumerate() {
            let mut coefficients = Vec::with_capacity(def.terms.len());
            let mut vars = Vec::with_capacity(def.terms.len());
            for term in &def.terms {
                let Some(&id) = by_name.get(term.var.as_str()) else {
                    return Err(ModelError::UnknownVariable {
                        index,
                        name: term.var.clone(),
                    });
                };
                coefficients.push(term.coeff);
                vars.push(id);
            }

            let id = spec.add_soft_constraint(
                &coefficients,
                &vars,
                def.op,
                def.rhs,
                def.penalty_neg,
                def.penalty_pos,
            )?;
            if let Some(label) = &def.label {
                spec.set_constraint_label(id, label.clone())?;
            }
        }

        Ok(LoadedModel { spec, variables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layoutqp_solver::ResultCode;

    const SCENARIO_B: &str = r#"{
        "variables": [{ "name": "x1" }, { "name": "x2" }, { "name": "x3" }],
        "constraints": [
            { "terms": [{ "coeff": 1, "var": "x1" }], "op": "eq", "rhs": 0 },
            { "terms": [{ "coeff": 1, "var": "x1" }, { "coeff": -1, "var": "x2" }],
              "op": "<=", "rhs": 0 },
            { "terms": [{ "coeff": 1, "var": "x2" }, { "coeff": -1, "var": "x3" }],
              "op": "le", "rhs": 0 },
            { "terms": [{ "coeff": 1, "var": "x3" }, { "coeff": -1, "var": "x1" }],
              "op": "=", "rhs": 20 },
            { "label": "gap1", "terms": [{ "coeff": 1, "var": "x2" }, { "coeff": -1, "var": "x1" }],
              "op": "eq", "rhs": 10, "penalty_neg": 5, "penalty_pos": 5 },
            { "label": "gap2", "terms": [{ "coeff": 1, "var": "x3" }, { "coeff": -1, "var": "x2" }],
              "op": "eq", "rhs": 5, "penalty_neg": 5, "penalty_pos": 5 }
        ]
    }"#;

    #[test]
    fn test_build_and_solve() {
        let mut model = ModelFile::parse(SCENARIO_B)
            .and_then(|m| m.build(SolverOptions::default()))
            .expect("valid model");
        assert_eq!(model.spec.solve(), ResultCode::Optimal);

        let x2 = model.lookup("x2").expect("declared");
        let value = model.spec.value(x2).expect("live");
        assert!((value - 12.5).abs() < 1e-6, "x2 = {} (expected 12.5)", value);
    }

    #[test]
    fn test_unknown_variable() {
        let source = r#"{
            "variables": [{ "name": "a" }],
            "constraints": [{ "terms": [{ "coeff": 1, "var": "b" }], "op": "ge", "rhs": 1 }]
        }"#;
        let result = ModelFile::parse(source).and_then(|m| m.build(SolverOptions::default()));
        assert!(
            matches!(
                result,
                Err(ModelError::UnknownVariable { index: 0, ref name }) if name == "b"
            ),
            "unexpected result"
        );
    }

    #[test]
    fn test_duplicate_variable() {
        let source = r#"{ "variables": [{ "name": "a" }, { "name": "a" }] }"#;
        let result = ModelFile::parse(source).and_then(|m| m.build(SolverOptions::default()));
        assert!(matches!(result, Err(ModelError::DuplicateVariable(ref name)) if name == "a"));
    }

    #[test]
    fn test_bad_range_is_a_spec_error() {
        let source = r#"{ "variables": [{ "name": "w", "min": 10, "max": 5 }] }"#;
        let result = ModelFile::parse(source).and_then(|m| m.build(SolverOptions::default()));
        assert!(matches!(
            result,
            Err(ModelError::Spec(SpecError::RangeConstraintRejected { .. }))
        ));
    }
}
