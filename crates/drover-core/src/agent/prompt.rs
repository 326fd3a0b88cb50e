//! Instruction payloads handed to the agent subprocess
//!
//! Two shapes: standard task prompts (one-shot execution) and idea workflow
//! prompts (one per leg of the explore-refine loop). Both end with an explicit
//! completion contract so the agent's final output is machine-recoverable.

use crate::classify::Complexity;
use crate::types::{MessageAuthor, Task, ThreadMessage};

/// Everything a standard execution prompt is assembled from.
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub messages: &'a [ThreadMessage],
    /// Pre-rendered learned-preferences section, empty when none apply.
    pub rules_block: &'a str,
    pub complexity: Complexity,
}

/// Which leg of the idea workflow this invocation serves.
#[derive(Debug, Clone, Copy)]
pub enum IdeaLeg<'a> {
    /// First run: explore, surface assumptions, propose variants.
    Initial,
    /// User picked a variant; build it out.
    Variant { index: usize },
    /// User left free-form feedback; revise accordingly.
    Feedback { feedback: &'a str },
}

/// Assemble the prompt for a standard task execution.
pub fn build_task_prompt(context: &PromptContext<'_>) -> String {
    let task = context.task;
    let mut prompt = String::new();

    prompt.push_str("# Task\n\n");
    prompt.push_str(&format!("Title: {}\n", task.title));
    prompt.push_str(&format!("Type: {}", task.task_type));
    if let Some(subtype) = &task.subtype {
        prompt.push_str(&format!(" ({subtype})"));
    }
    prompt.push('\n');
    if let Some(path) = &task.project_path {
        prompt.push_str(&format!("Project directory: {}\n", path.display()));
    }
    if !task.description.is_empty() {
        prompt.push_str(&format!("\n{}\n", task.description));
    }

    push_thread_context(&mut prompt, context.messages);
    push_rules(&mut prompt, context.rules_block);

    prompt.push_str("\n## Approach\n\n");
    match context.complexity {
        Complexity::Simple => {
            prompt.push_str(
                "Handle this directly yourself. Keep the scope tight: make the \
                 requested change, verify it, and stop.\n",
            );
        }
        Complexity::Complex => {
            prompt.push_str(
                "Act as the lead on this work. Break it into phases, delegate \
                 self-contained pieces to subagents where that helps, and \
                 integrate the results before finishing.\n",
            );
        }
    }

    push_completion_contract(&mut prompt);
    prompt
}

/// Assemble the prompt for one leg of an idea workflow.
pub fn build_idea_prompt(
    task: &Task,
    messages: &[ThreadMessage],
    rules_block: &str,
    leg: IdeaLeg<'_>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Idea\n\n");
    prompt.push_str(&format!("Title: {}\n", task.title));
    if let Some(path) = &task.project_path {
        prompt.push_str(&format!("Project directory: {}\n", path.display()));
    }
    if !task.description.is_empty() {
        prompt.push_str(&format!("\n{}\n", task.description));
    }

    push_thread_context(&mut prompt, messages);
    push_rules(&mut prompt, rules_block);

    prompt.push_str("\n## This round\n\n");
    match leg {
        IdeaLeg::Initial => {
            prompt.push_str(
                "This idea is deliberately underspecified. Explore it: record the \
                 assumptions you are making, sketch 2-4 distinct variants with \
                 their trade-offs, then implement the variant you judge most \
                 promising as a working first cut.\n",
            );
        }
        IdeaLeg::Variant { index } => {
            prompt.push_str(&format!(
                "The user reviewed the proposed variants and chose variant {index}. \
                 Build that variant out fully, carrying over anything from the \
                 first cut that still applies.\n"
            ));
            push_prior_round(&mut prompt, task);
        }
        IdeaLeg::Feedback { feedback } => {
            prompt.push_str("The user reviewed the current state and left feedback:\n\n");
            for line in feedback.lines() {
                prompt.push_str(&format!("> {line}\n"));
            }
            prompt.push_str("\nRevise the work to address this feedback.\n");
            push_prior_round(&mut prompt, task);
        }
    }

    prompt.push_str(
        "\n## Reporting\n\n\
         When you are done, end your output with a single fenced JSON block \
         describing where things stand:\n\n\
         ```json\n\
         {\n\
         \x20 \"assumptions\": [{\"key\": \"audience\", \"value\": \"what you assumed\"}],\n\
         \x20 \"variants\": [{\"name\": \"...\", \"description\": \"...\", \"pros\": [], \"cons\": []}],\n\
         \x20 \"selectedVariantIndex\": 0,\n\
         \x20 \"epicId\": null\n\
         }\n\
         ```\n\n\
         Output nothing after the closing fence.\n",
    );
    prompt
}

fn push_thread_context(prompt: &mut String, messages: &[ThreadMessage]) {
    if messages.is_empty() {
        return;
    }
    prompt.push_str("\n## Conversation so far\n\n");
    for message in messages {
        let label = match message.author {
            MessageAuthor::User => "User",
            MessageAuthor::Agent => "Agent",
        };
        prompt.push_str(&format!("{label}: {}\n", message.body));
    }
}

fn push_rules(prompt: &mut String, rules_block: &str) {
    if rules_block.is_empty() {
        return;
    }
    prompt.push('\n');
    prompt.push_str(rules_block);
    if !rules_block.ends_with('\n') {
        prompt.push('\n');
    }
}

/// Carry prior-round state into re-entry legs so the agent does not rediscover
/// its own earlier proposals.
fn push_prior_round(prompt: &mut String, task: &Task) {
    if !task.assumptions.is_empty() {
        prompt.push_str("\nAssumptions recorded last round:\n");
        for assumption in &task.assumptions {
            prompt.push_str(&format!("- {}: {}\n", assumption.key, assumption.value));
        }
    }
    if !task.variants.is_empty() {
        prompt.push_str("\nVariants proposed last round:\n");
        for (index, variant) in task.variants.iter().enumerate() {
            prompt.push_str(&format!("{index}. {}: {}\n", variant.name, variant.description));
        }
    }
}

fn push_completion_contract(prompt: &mut String) {
    prompt.push_str(
        "\n## Completion\n\n\
         If you have tools that update the task record, set the result there. \
         Otherwise finish by printing a short summary of what you did; the last \
         part of your output is kept as the task result.\n",
    );
}
