//! Compute artifact generation: turns a request's code into the notebooks the
//! owner runs (prover) and the consumer runs (verifier).

use serde_json::Value as JsonValue;
use zkdm_common::AgreedComputation;

use crate::error::NotebookError;

const PROVER_TEMPLATE: &str = include_str!("../templates/prover.ipynb");
const VERIFIER_TEMPLATE: &str = include_str!("../templates/verifier.ipynb");
const PARAMS_CELL: usize = 1;
const CODE_CELL: usize = 5;
const KIND_LINE: &str = "KIND = ";
const OPERANDS_LINE: &str = "OPERANDS = ";

pub trait ComputeArtifactGenerator: Send + Sync {
    /// Notebook that runs `code` and produces the proof bundle for `computation`.
    fn generate(
        &self,
        code: &str,
        computation: &AgreedComputation,
    ) -> Result<Vec<u8>, NotebookError>;

    /// Notebook that checks a bundle produced for `code` and `computation`.
    fn generate_verifier(
        &self,
        code: &str,
        computation: &AgreedComputation,
    ) -> Result<Vec<u8>, NotebookError>;
}

/// Fills the code cell of a notebook template with the request code and
/// the `KIND` / `OPERANDS` lines of the parameters cell with the agreed
/// computation.
#[derive(Clone, Debug)]
pub struct TemplateNotebookGenerator {
    prover: JsonValue,
    verifier: JsonValue,
    code_cell: usize,
}

fn cell_source(notebook: &JsonValue, index: usize) -> Option<Vec<String>> {
    notebook
        .get("cells")?
        .get(index)?
        .get("source")?
        .as_array()?
        .iter()
        .map(|line| line.as_str().map(str::to_string))
        .collect()
}

fn set_cell_source(
    notebook: &mut JsonValue,
    index: usize,
    lines: Vec<String>,
) -> Result<(), NotebookError> {
    let cell = notebook
        .get_mut("cells")
        .and_then(|cells| cells.get_mut(index))
        .and_then(JsonValue::as_object_mut)
        .ok_or_else(|| NotebookError::Template(format!("missing cell {index}")))?;
    cell.insert(
        "source".into(),
        JsonValue::Array(lines.into_iter().map(JsonValue::String).collect()),
    );
    Ok(())
}

impl TemplateNotebookGenerator {
    pub fn new(prover: &str, verifier: &str, code_cell: usize) -> Result<Self, NotebookError> {
        let parse = |template: &str, name: &str| -> Result<JsonValue, NotebookError> {
            let value: JsonValue = serde_json::from_str(template)
                .map_err(|err| NotebookError::Template(format!("{name}: {err}")))?;
            let has_cell = value
                .get("cells")
                .and_then(JsonValue::as_array)
                .map_or(false, |cells| cells.len() > code_cell);
            if !has_cell {
                return Err(NotebookError::Template(format!(
                    "{name} has no cell {code_cell}"
                )));
            }
            let params = cell_source(&value, PARAMS_CELL).unwrap_or_default();
            for prefix in [KIND_LINE, OPERANDS_LINE] {
                if !params.iter().any(|line| line.starts_with(prefix)) {
                    return Err(NotebookError::Template(format!(
                        "{name} cell {PARAMS_CELL} has no `{}` line",
                        prefix.trim_end()
                    )));
                }
            }
            Ok(value)
        };
        Ok(Self {
            prover: parse(prover, "prover template")?,
            verifier: parse(verifier, "verifier template")?,
            code_cell,
        })
    }

    /// Generator over the bundled templates.
    pub fn bundled() -> Result<Self, NotebookError> {
        Self::new(PROVER_TEMPLATE, VERIFIER_TEMPLATE, CODE_CELL)
    }

    fn fill(
        &self,
        template: &JsonValue,
        code: &str,
        computation: &AgreedComputation,
    ) -> Result<Vec<u8>, NotebookError> {
        let mut notebook = template.clone();

        let kind = serde_json::to_string(computation.kind.as_str())?;
        let kind = format!("{KIND_LINE}{kind}\n");
        let operands = serde_json::to_string(&computation.operands)?;
        let operands = format!("{OPERANDS_LINE}{operands}\n");
        let params = cell_source(&notebook, PARAMS_CELL)
            .ok_or_else(|| NotebookError::Template(format!("missing cell {PARAMS_CELL}")))?
            .into_iter()
            .map(|line| {
                if line.starts_with(KIND_LINE) {
                    kind.clone()
                } else if line.starts_with(OPERANDS_LINE) {
                    operands.clone()
                } else {
                    line
                }
            })
            .collect();
        set_cell_source(&mut notebook, PARAMS_CELL, params)?;

        let source = code.split('\n').map(|line| format!("{line}\n")).collect();
        set_cell_source(&mut notebook, self.code_cell, source)?;
        Ok(serde_json::to_vec(&notebook)?)
    }
}

impl ComputeArtifactGenerator for TemplateNotebookGenerator {
    fn generate(
        &self,
        code: &str,
        computation: &AgreedComputation,
    ) -> Result<Vec<u8>, NotebookError> {
        self.fill(&self.prover, code, computation)
    }

    fn generate_verifier(
        &self,
        code: &str,
        computation: &AgreedComputation,
    ) -> Result<Vec<u8>, NotebookError> {
        self.fill(&self.verifier, code, computation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use zkdm_common::ComputationKind;

    fn code_cell(bytes: &[u8]) -> JsonValue {
        let notebook: JsonValue = serde_json::from_slice(bytes).unwrap();
        notebook["cells"][CODE_CELL]["source"].clone()
    }

    fn params(bytes: &[u8]) -> Vec<String> {
        cell_source(&serde_json::from_slice(bytes).unwrap(), PARAMS_CELL).unwrap()
    }

    fn sum_x() -> AgreedComputation {
        AgreedComputation::new(ComputationKind::Sum, vec!["x".into()])
    }

    #[test]
    fn code_lines_fill_the_code_cell() {
        let generator = TemplateNotebookGenerator::bundled().unwrap();
        let notebook = generator
            .generate("def compute(state, x):\n    return x.sum()", &sum_x())
            .unwrap();
        assert_eq!(
            code_cell(&notebook),
            serde_json::json!(["def compute(state, x):\n", "    return x.sum()\n"])
        );

        let verifier = generator.generate_verifier("x", &sum_x()).unwrap();
        assert_eq!(code_cell(&verifier), serde_json::json!(["x\n"]));
        assert_ne!(notebook, verifier);
    }

    #[test]
    fn both_notebooks_carry_the_agreed_computation() {
        let generator = TemplateNotebookGenerator::bundled().unwrap();
        let dot = AgreedComputation::new(
            ComputationKind::DotProduct,
            vec!["price".into(), "qty".into()],
        );
        for notebook in [
            generator.generate("code", &dot).unwrap(),
            generator.generate_verifier("code", &dot).unwrap(),
        ] {
            let lines = params(&notebook);
            assert!(lines.contains(&"KIND = \"dot_product\"\n".to_string()));
            assert!(lines.contains(&"OPERANDS = [\"price\",\"qty\"]\n".to_string()));
        }
    }

    #[test]
    fn templates_without_the_code_cell_are_rejected() {
        let short = r#"{"cells": [{"cell_type": "markdown", "source": []}]}"#;
        assert!(matches!(
            TemplateNotebookGenerator::new(short, short, CODE_CELL),
            Err(NotebookError::Template(_))
        ));
        assert!(TemplateNotebookGenerator::new("not json", short, 0).is_err());
    }
}
