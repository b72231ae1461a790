use text_splitter::TextSplitter;

use common::storage::types::git_file::GitFile;

/// Files above this size never become snippets.
const MAX_INDEXABLE_BYTES: u64 = 1_048_576;

/// A file chunk becomes its own snippet once content crosses this length.
const MAX_SNIPPET_CHARS: usize = 4000;
const MIN_SNIPPET_CHARS: usize = 500;

/// Source extensions the extractor indexes.
const INDEXABLE_EXTENSIONS: [&str; 28] = [
    "c", "cc", "cpp", "cs", "css", "go", "h", "hpp", "html", "java", "js", "json", "jsx", "kt",
    "lua", "md", "php", "py", "rb", "rs", "scala", "sh", "sql", "swift", "toml", "ts", "tsx",
    "yaml",
];

/// Path segments that mark a file as a usage example rather than library code.
const EXAMPLE_SEGMENTS: [&str; 4] = ["examples", "example", "demos", "samples"];

pub fn is_indexable(file: &GitFile) -> bool {
    if file.size == 0 || file.size > MAX_INDEXABLE_BYTES {
        return false;
    }
    INDEXABLE_EXTENSIONS.contains(&file.extension.as_str())
}

pub fn is_example_path(path: &str) -> bool {
    path.split('/')
        .any(|segment| EXAMPLE_SEGMENTS.contains(&segment.to_ascii_lowercase().as_str()))
}

/// Split file content into snippet-sized chunks. Files at or below the chunk
/// ceiling stay whole, so a small file's snippet sha is the sha of its exact
/// bytes.
pub fn split_content(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    if content.chars().count() <= MAX_SNIPPET_CHARS {
        return vec![content.to_string()];
    }

    let splitter = TextSplitter::new(MIN_SNIPPET_CHARS..MAX_SNIPPET_CHARS);
    splitter.chunks(content).map(str::to_string).collect()
}
