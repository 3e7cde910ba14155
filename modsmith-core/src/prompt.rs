//! Prompt layout and code extraction
//!
//! Generation prompts are split into marked sections so the generated code
//! can be cut back out of a completion that echoes the prompt.

use crate::provider::ChatMessage;

pub const CONTEXT_MARKER: &str = "// MINECRAFT CONTEXT";
pub const REQUEST_MARKER: &str = "// USER REQUEST";
pub const CODE_MARKER: &str = "// GENERATED JAVA CODE";
pub const END_MARKER: &str = "// END";

/// System message shared by every task
pub fn system_prompt(minecraft_version: &str, fabric_version: &str) -> String {
    format!(
        "You are an expert Minecraft mod developer targeting Fabric {} (Fabric API {}). \
         Answer with complete, compilable Java source. Do not explain the code unless asked.",
        minecraft_version, fabric_version
    )
}

pub fn build_generation_prompt(context: &str, request: &str) -> String {
    format!(
        "{CONTEXT_MARKER}\n{}\n\n{REQUEST_MARKER}\n{}\n\n{CODE_MARKER}\n",
        context.trim(),
        request.trim()
    )
}

pub fn build_analysis_prompt(code: &str, focus: &str) -> String {
    format!(
        "Review the following Fabric mod code with a focus on {}.\n\
         List concrete problems first, then suggested improvements.\n\n\
         ```java\n{}\n```\n",
        focus.trim(),
        code.trim_end()
    )
}

pub fn build_repair_prompt(code: &str, error: &str) -> String {
    format!(
        "The following Fabric mod code fails with this error:\n{}\n\n\
         ```java\n{}\n```\n\n\
         Return the complete corrected class after the marker below.\n\n{CODE_MARKER}\n",
        error.trim(),
        code.trim_end()
    )
}

/// Chat messages for a prompt built by one of the functions above
pub fn messages(system: &str, prompt: String) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(prompt)]
}

/// Pull the Java source out of a model completion.
///
/// Tried in order: text after the generated-code marker (up to the next
/// section marker), the first fenced code block, text after the last other
/// marker, and finally the whole output.
pub fn extract_generated_code(output: &str) -> String {
    if let Some(start) = output.find(CODE_MARKER) {
        let rest = &output[start + CODE_MARKER.len()..];
        let end = [END_MARKER, REQUEST_MARKER, CONTEXT_MARKER]
            .iter()
            .filter_map(|m| rest.find(m))
            .min()
            .unwrap_or(rest.len());
        let code = strip_fence(rest[..end].trim());
        return code.trim().to_string();
    }

    if let Some(code) = first_fenced_block(output) {
        return code;
    }

    let last_marker = [CONTEXT_MARKER, REQUEST_MARKER]
        .iter()
        .filter_map(|m| output.rfind(m).map(|pos| pos + m.len()))
        .max();
    if let Some(pos) = last_marker {
        return output[pos..].trim().to_string();
    }

    output.trim().to_string()
}

fn first_fenced_block(output: &str) -> Option<String> {
    let open = output.find("```")?;
    let after_fence = &output[open + 3..];
    // Skip the info string (```java)
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim().to_string())
}

/// Models often wrap the code after the marker in a fence anyway
fn strip_fence(code: &str) -> &str {
    if !code.starts_with("```") {
        return code;
    }
    let Some(newline) = code.find('\n') else {
        return code;
    };
    let body = &code[newline + 1..];
    match body.rfind("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prompt_layout() {
        let prompt = build_generation_prompt("import net.minecraft.block.Block;", "a ruby block");
        let context = prompt.find(CONTEXT_MARKER).unwrap();
        let request = prompt.find(REQUEST_MARKER).unwrap();
        let code = prompt.find(CODE_MARKER).unwrap();
        assert!(context < request && request < code);
        assert!(prompt.ends_with("// GENERATED JAVA CODE\n"));
    }

    #[test]
    fn test_extract_after_code_marker() {
        let output = format!(
            "{}\nctx\n{}\nmake it\n{}\npublic class RubyBlock {{}}\n// END\ntrailing noise",
            CONTEXT_MARKER, REQUEST_MARKER, CODE_MARKER
        );
        assert_eq!(extract_generated_code(&output), "public class RubyBlock {}");
    }

    #[test]
    fn test_extract_cuts_at_echoed_marker() {
        let output = format!("{}\nclass A {{}}\n{}\nagain", CODE_MARKER, REQUEST_MARKER);
        assert_eq!(extract_generated_code(&output), "class A {}");
    }

    #[test]
    fn test_extract_fenced_inside_marker() {
        let output = format!("{}\n```java\nclass B {{}}\n```\n", CODE_MARKER);
        assert_eq!(extract_generated_code(&output), "class B {}");
    }

    #[test]
    fn test_extract_fenced_block() {
        let output = "Here you go:\n```java\npublic class C {}\n```\nEnjoy!";
        assert_eq!(extract_generated_code(output), "public class C {}");
    }

    #[test]
    fn test_extract_after_last_marker() {
        let output = format!("{}\nctx\n{}\n  class D {{}}  ", CONTEXT_MARKER, REQUEST_MARKER);
        assert_eq!(extract_generated_code(&output), "class D {}");
    }

    #[test]
    fn test_extract_plain_output() {
        assert_eq!(extract_generated_code("  class E {}\n"), "class E {}");
    }

    #[test]
    fn test_repair_prompt_ends_with_marker() {
        let prompt = build_repair_prompt("class F {", "';' expected");
        assert!(prompt.contains("';' expected"));
        assert!(prompt.trim_end().ends_with(CODE_MARKER));
    }
}
