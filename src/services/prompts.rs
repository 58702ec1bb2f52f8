//! Prompt Builders
//!
//! System prompts and message lists for every completion the application
//! issues: planning, single-file generation, legacy whole-project
//! generation, chat replies and prompt enhancement.

use codeforge_llm::{Message, MessageRole};

use crate::models::artifact::{
    FilePlanEntry, GenerationOptions, GenerationRequest, ENTRY_FILE, STYLESHEET_FILE,
};

pub const CHAT_SYSTEM_PROMPT: &str = "You are Codeforge, an AI web builder. You help people describe what \
they want; the code itself is generated separately. Never output code. Reply in plain language, \
in one or two short sentences, and do not ask questions.";

pub const PLAN_SYSTEM_PROMPT: &str = r#"You are the planning step of a React project generator.
Read the conversation and decide which files the project needs.
Respond with ONLY a JSON object, no prose and no markdown, in exactly this shape:
{"projectTitle": "Short title", "explanation": "One paragraph describing the project", "files": [{"path": "/App.js", "description": "What this file contains"}]}
Rules:
- Stack: React with Vite, Tailwind CSS for styling, lucide-react for icons, framer-motion for animation.
- Paths start with "/" and never include a "src/" prefix.
- Always include "/App.js" (the root component) and "/index.css" (global styles with the Tailwind directives).
- Split the UI into small components under "/components/". Keep the plan between 3 and 12 files.
- Every entry needs both a path and a one-sentence description."#;

pub const FILE_SYSTEM_PROMPT: &str = r#"You are a senior React developer writing one file of a larger project.
Stack: React with Vite, Tailwind CSS, lucide-react icons, framer-motion animations.
Write complete, working code with realistic sample content. Use default exports for components.
Import sibling files with relative paths that match the project file list.
Output only the file's source code. No JSON, no markdown fences, no explanations."#;

pub const CODE_GEN_PROMPT: &str = r#"You generate complete React projects.
Respond with ONLY a JSON object in exactly this shape:
{"projectTitle": "Short title", "explanation": "One paragraph describing the project", "files": {"/App.js": {"code": "..."}, "/index.css": {"code": "..."}}}
Rules:
- Stack: React with Vite, Tailwind CSS, lucide-react icons, framer-motion animations.
- Paths start with "/" and never include a "src/" prefix.
- Always include "/App.js" and "/index.css".
- Escape every newline and quote inside code strings so the document is valid JSON.
- Write complete, working code with realistic sample content."#;

pub const ENHANCE_SYSTEM_PROMPT: &str = "You help non-technical people describe the websites they want, \
using clear and friendly language. Never write code.";

pub const ENHANCE_RULES: &str = r#"Rewrite the prompt below into a clear, specific brief for building a website.
- Keep the person's intent and every feature they asked for.
- Name the pages or sections, the main interactions and the visual style.
- Suggest sensible defaults for anything they left open.
- Write one paragraph of 120 to 200 words, in plain language, with no code and no lists.
Respond with only the improved prompt."#;

const SUPABASE_NOTE: &str = "Use Supabase for data and authentication: create the client in \
\"/lib/supabaseClient.js\" from the VITE_SUPABASE_URL and VITE_SUPABASE_ANON_KEY environment variables.";

const VERCEL_NOTE: &str = "The project will be deployed to Vercel: keep it a standard Vite build \
with no server code.";

/// Copy the transcript, dropping system turns the caller may have sent
fn transcript(request: &GenerationRequest) -> impl Iterator<Item = Message> + '_ {
    request
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .cloned()
}

fn option_notes(options: &GenerationOptions) -> String {
    let mut notes = String::new();
    if options.include_supabase {
        notes.push('\n');
        notes.push_str(SUPABASE_NOTE);
    }
    if options.deploy_to_vercel {
        notes.push('\n');
        notes.push_str(VERCEL_NOTE);
    }
    notes
}

/// Messages for the planning call
pub fn plan_messages(request: &GenerationRequest) -> Vec<Message> {
    let mut system = PLAN_SYSTEM_PROMPT.to_string();
    let existing = request.existing_paths();
    if !existing.is_empty() {
        system.push_str(&format!(
            "\nEXISTING FILES (update these, don't recreate): {}",
            existing.join(", ")
        ));
    }
    system.push_str(&option_notes(&request.options));

    std::iter::once(Message::system(system))
        .chain(transcript(request))
        .collect()
}

/// Messages for generating one plan entry
pub fn file_messages(
    request: &GenerationRequest,
    entry: &FilePlanEntry,
    plan: &[FilePlanEntry],
) -> Vec<Message> {
    let mut system = FILE_SYSTEM_PROMPT.to_string();
    let others: Vec<&str> = plan
        .iter()
        .filter(|e| e.path != entry.path)
        .map(|e| e.path.as_str())
        .collect();
    if !others.is_empty() {
        system.push_str(&format!(
            "\nOther files in this project: {}. Import from them as needed.",
            others.join(", ")
        ));
    }
    if entry.path == STYLESHEET_FILE {
        system.push_str("\nThis is the global stylesheet: start with the three Tailwind directives.");
    } else if entry.path == ENTRY_FILE {
        system.push_str("\nThis is the root component: it composes the other components.");
    }
    system.push_str(&option_notes(&request.options));

    let user = format!(
        "PROJECT REQUEST: {}\n\nGENERATE FILE: {}\nDESCRIPTION: {}\n\nOutput ONLY the raw source code for this file. No JSON wrapping. No markdown. Just code.",
        request.latest_user_prompt(),
        entry.path,
        entry.description
    );
    vec![Message::system(system), Message::user(user)]
}

/// Messages for the legacy whole-project call
pub fn legacy_messages(request: &GenerationRequest) -> Vec<Message> {
    let mut system = CODE_GEN_PROMPT.to_string();
    let existing = request.existing_paths();
    if !existing.is_empty() {
        system.push_str(&format!(
            "\nCURRENT FILES (update, don't recreate): {}",
            existing.join(", ")
        ));
    }
    system.push_str(&option_notes(&request.options));
    system.push_str("\n\nREMINDER: Respond with ONLY valid JSON with a \"files\" key.");

    std::iter::once(Message::system(system))
        .chain(transcript(request))
        .collect()
}

/// Messages for a short chat reply
pub fn chat_messages(history: &[Message]) -> Vec<Message> {
    std::iter::once(Message::system(CHAT_SYSTEM_PROMPT))
        .chain(history.iter().filter(|m| m.role != MessageRole::System).cloned())
        .collect()
}

/// Messages for prompt enhancement
pub fn enhance_messages(prompt: &str) -> Vec<Message> {
    vec![
        Message::system(ENHANCE_SYSTEM_PROMPT),
        Message::user(format!("{}\n\nOriginal prompt: {}", ENHANCE_RULES, prompt.trim())),
    ]
}
