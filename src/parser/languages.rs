use tree_sitter::Language;

/// Which grammar a file is parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LangKind {
    TypeScript,
    Tsx,
    JavaScript,
}

impl LangKind {
    /// Grammar for the given file extension, or `None` if the extension is not supported.
    ///
    /// - `.ts`        -> TypeScript grammar
    /// - `.tsx`       -> TSX grammar
    ///   These MUST be different: the TypeScript grammar cannot parse JSX, and the TSX grammar
    ///   breaks angle-bracket type assertions (`<T>expr`).
    /// - `.js`/`.jsx` -> JavaScript grammar
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "jsx" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub fn language(self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}
