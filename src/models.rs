use serde::Deserialize;

/// Body of `POST /api/llm-structure`.
///
/// Fields default to empty so that missing and blank values are rejected by
/// [`StructureRequest::into_abstract`] rather than by the extractor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureRequest {
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub llm_prompt: String,
    #[serde(default)]
    pub backend: String,
}

/// Validated, backend-agnostic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractRequest {
    pub instruction: String,
    pub payload: String,
    pub backend: String,
}

impl StructureRequest {
    pub fn into_abstract(self) -> Result<AbstractRequest, String> {
        if self.raw_text.trim().is_empty() {
            return Err("rawText is required".to_owned());
        }
        if self.llm_prompt.trim().is_empty() {
            return Err("llmPrompt is required".to_owned());
        }
        if self.backend.trim().is_empty() {
            return Err("backend is required".to_owned());
        }

        Ok(AbstractRequest {
            instruction: self.llm_prompt,
            payload: self.raw_text,
            backend: self.backend.trim().to_owned(),
        })
    }
}
