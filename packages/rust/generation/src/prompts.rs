//! Prompt text and sampling temperature per stage.

use crate::client::StageContext;

/// Build the prompt for a stage request.
pub fn render(context: &StageContext) -> String {
    match context {
        StageContext::Name { topic } => format!(
            "You name university courses.\n\
             Propose ONE professional, engaging university-level course title for the topic \"{topic}\".\n\
             \n\
             Rules:\n\
             - Reply with JSON only, exactly in this shape: {{ \"suggestion\": \"Course Title\" }}\n\
             - The title has between 5 and 12 words.\n\
             - Prefer specific wording over phrases like \"Introduction to\".\n\
             - No commentary outside the JSON."
        ),
        StageContext::Outline {
            course_title,
            modules,
            topics,
        } => format!(
            "You design university course outlines.\n\
             Write the outline for the course \"{course_title}\".\n\
             \n\
             Reply with JSON only, in this shape:\n\
             {{\n\
               \"modules\": [\n\
                 {{ \"title\": \"Module title\", \"submodules\": [\"Topic\", \"Topic\"] }}\n\
               ]\n\
             }}\n\
             \n\
             Rules:\n\
             - Exactly {modules} modules, each with exactly {topics} submodules.\n\
             - Submodules are short topic names, not sentences.\n\
             - No explanations, markdown, or text outside the JSON."
        ),
        StageContext::Topic(topic) => format!(
            "You write learning material for university courses.\n\
             \n\
             Course: \"{course}\"\n\
             Module: \"{module}\"\n\
             Topic: \"{name}\"\n\
             \n\
             Reply with JSON only, in this shape:\n\
             {{\n\
               \"text\": [\"3 to 6 academic paragraphs covering the key concepts, with examples and their relevance to the module\"],\n\
               \"videos\": [\"2 to 4 YouTube links on the topic\"],\n\
               \"mcqs\": [\n\
                 {{ \"question\": \"Conceptual question?\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"answer\": \"the correct option, copied verbatim\" }}\n\
               ],\n\
               \"extraQuestions\": [\"2 to 4 open-ended discussion questions\"]\n\
             }}\n\
             \n\
             Rules:\n\
             - All four keys must be present.\n\
             - Escape quotes inside strings.\n\
             - No LaTeX delimiters such as \\( or \\).\n\
             - No markdown and no text outside the JSON.",
            course = topic.course,
            module = topic.module,
            name = topic.topic,
        ),
    }
}

/// Sampling temperature per stage.
pub fn temperature(context: &StageContext) -> f64 {
    match context {
        StageContext::Name { .. } | StageContext::Outline { .. } => 0.7,
        StageContext::Topic(_) => 0.6,
    }
}
