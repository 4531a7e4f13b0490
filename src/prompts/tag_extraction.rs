//! Tag extraction prompts.
//!
//! System and user prompt templates asking the model for four structured
//! tags from an article's title and abstract.

/// System prompt for tag extraction
pub const SYSTEM_PROMPT: &str = "You are a scientific text analysis assistant.";

/// User prompt template for a single article
/// Placeholders: {title}, {abstract}
pub const USER_PROMPT_TEMPLATE: &str = r#"You are an expert in environmental science. Analyze the following scientific article and extract:
1. The types of plastics studied (e.g., PE, PP, PS, PET, PVC). If none are mentioned, answer "None".
2. Whether the paper is a "Review Paper" or a "Primary Study".
3. The environmental source type studied (e.g., River, Estuary, Bay, Lake, Reservoir, Mangrove, WWTP Effluent, Open Ocean, Marine, Intertidal Zone). Answer "Unknown" if unclear.
4. The method used to detect antibiotic resistance (e.g., qPCR, PCR, Metagenomics, Culture-based).

Title: {title}
Abstract: {abstract}

Respond ONLY with valid JSON (no markdown, no extra text):
{
  "plastics_found": "comma-separated plastic types or None",
  "paper_type": "Review Paper" | "Primary Study",
  "source_type": "source type or Unknown",
  "method_ar_detection": "detection method(s)"
}"#;

/// Build user prompt for one article
pub fn build_user_prompt(title: &str, abstract_text: &str) -> String {
    USER_PROMPT_TEMPLATE
        .replace("{title}", title)
        .replace("{abstract}", abstract_text)
}
