use crate::Message;

/// Build the message list for one call.
///
/// A non-empty `context` is folded into the user content ahead of the task,
/// one `key: value` line per entry, in the order given.
pub fn create_prompt(system: &str, user: &str, context: &[(&str, String)]) -> Vec<Message> {
    let user_content = if context.is_empty() {
        user.to_string()
    } else {
        let lines: Vec<String> = context.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        format!("Context:\n{}\n\nTask:\n{user}", lines.join("\n"))
    };

    vec![Message::system(system), Message::user(user_content)]
}
