use std::sync::LazyLock;

use regex::Regex;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment pattern"));
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//[^\n]*").expect("valid line comment pattern"));
static PUBLIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bpublic\s+(?:(?:final|abstract|sealed|non-sealed|static|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("valid public type pattern")
});
static ANY_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bclass\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid class pattern")
});

/// How a language derives the file stem (and, where relevant, the symbol the
/// runtime is pointed at) from submitted source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResolution {
    /// Always the same stem, regardless of the source.
    Fixed(&'static str),
    /// The first public type declared in the source, else the first class,
    /// else `default`.
    PublicType { default: &'static str },
}

impl EntryResolution {
    /// Pure text scan. Always returns a valid identifier.
    pub fn resolve(&self, source: &str) -> String {
        match self {
            Self::Fixed(name) => (*name).to_string(),
            Self::PublicType { default } => {
                let stripped = strip_comments(source);
                PUBLIC_TYPE
                    .captures(&stripped)
                    .or_else(|| ANY_CLASS.captures(&stripped))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                    .filter(|name| is_identifier(name))
                    .unwrap_or_else(|| (*default).to_string())
            }
        }
    }
}

fn strip_comments(source: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(source, " ");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 128
}

#[cfg(test)]
mod tests {
    use super::EntryResolution;

    const JAVA: EntryResolution = EntryResolution::PublicType { default: "Main" };

    #[test]
    fn fixed_ignores_source() {
        assert_eq!(EntryResolution::Fixed("main").resolve("class Foo {}"), "main");
    }

    #[test]
    fn finds_public_class() {
        let src = "import java.util.*;\n\nclass Helper {}\npublic final class Solution {\n  public static void main(String[] a) {}\n}\n";
        assert_eq!(JAVA.resolve(src), "Solution");
    }

    #[test]
    fn falls_back_to_first_class_then_default() {
        assert_eq!(JAVA.resolve("class Runner { }"), "Runner");
        assert_eq!(JAVA.resolve("System.out.println(1);"), "Main");
        assert_eq!(JAVA.resolve(""), "Main");
    }

    #[test]
    fn ignores_declarations_inside_comments() {
        let src = "// public class Fake {}\n/* public class AlsoFake */\npublic class Real {}";
        assert_eq!(JAVA.resolve(src), "Real");
    }

    #[test]
    fn never_yields_path_like_names() {
        let src = "public class ../../etc/passwd {}";
        assert_eq!(JAVA.resolve(src), "Main");
    }
}
