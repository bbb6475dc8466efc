use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Video,
    Image,
    Audio,
    Document,
    Archive,
    Code,
    Subtitle,
    Other,
}

impl FileCategory {
    pub fn from_name(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return FileCategory::Other,
        };
        match ext.as_str() {
            "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "ts" | "m2ts" | "rmvb" | "webm"
            | "m4v" | "mpg" | "mpeg" | "iso" => FileCategory::Video,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" | "tiff" | "svg" => {
                FileCategory::Image
            }
            "mp3" | "flac" | "aac" | "wav" | "ogg" | "m4a" | "ape" | "wma" | "opus" => {
                FileCategory::Audio
            }
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" | "epub"
            | "mobi" | "nfo" => FileCategory::Document,
            "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => FileCategory::Archive,
            "py" | "js" | "rs" | "go" | "java" | "c" | "cpp" | "sh" | "json" | "html" | "css" => {
                FileCategory::Code
            }
            "srt" | "ass" | "ssa" | "vtt" | "sub" | "sup" | "idx" => FileCategory::Subtitle,
            _ => FileCategory::Other,
        }
    }

    /// Category reported by the drive, falling back to the extension.
    pub fn detect(vendor: Option<&str>, name: &str) -> Self {
        match vendor.map(str::to_ascii_lowercase).as_deref() {
            Some("video") => FileCategory::Video,
            Some("image" | "picture") => FileCategory::Image,
            Some("audio") => FileCategory::Audio,
            Some("doc" | "document") => FileCategory::Document,
            Some("archive" | "zip") => FileCategory::Archive,
            _ => Self::from_name(name),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Video => "video",
            FileCategory::Image => "image",
            FileCategory::Audio => "audio",
            FileCategory::Document => "document",
            FileCategory::Archive => "archive",
            FileCategory::Code => "code",
            FileCategory::Subtitle => "subtitle",
            FileCategory::Other => "other",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            FileCategory::Video => "🎞️",
            FileCategory::Image => "🖼️",
            FileCategory::Audio => "🎵",
            FileCategory::Document => "📄",
            FileCategory::Archive => "📦",
            FileCategory::Code => "💻",
            FileCategory::Subtitle => "💬",
            FileCategory::Other => "📎",
        }
    }
}

const DIR_ICON: &str = "📁";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    pub id: String,
    pub original: String,
    pub resolved: String,
    pub category: FileCategory,
    pub size: u64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Dir { path: String, name: String },
    File(SavedFile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    children: Vec<usize>,
}

/// What one task run added to the destination, in insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTree {
    nodes: Vec<Node>,
    #[serde(skip)]
    dirs: HashMap<String, usize>,
    #[serde(skip)]
    files: HashMap<String, usize>,
}

impl ResultTree {
    pub fn new(root_path: &str) -> Self {
        let root_path = clean(root_path);
        let mut dirs = HashMap::new();
        dirs.insert(root_path.clone(), 0);
        Self {
            nodes: vec![Node {
                id: String::new(),
                kind: NodeKind::Dir {
                    name: root_path.clone(),
                    path: root_path,
                },
                children: Vec::new(),
            }],
            dirs,
            files: HashMap::new(),
        }
    }

    pub fn root_path(&self) -> &str {
        match &self.nodes[0].kind {
            NodeKind::Dir { path, .. } => path,
            NodeKind::File(_) => "/",
        }
    }

    /// Directory node for `path`, created along with any missing ancestors
    /// between it and the root. `id` is recorded when known.
    pub fn ensure_dir(&mut self, path: &str, id: Option<&str>) -> usize {
        let path = clean(path);
        if let Some(&index) = self.dirs.get(&path) {
            if let Some(id) = id
                && self.nodes[index].id.is_empty()
            {
                self.nodes[index].id = id.to_string();
            }
            return index;
        }
        let parent = match path.rsplit_once('/') {
            Some((parent, _)) if path.starts_with(self.root_path()) && path != self.root_path() => {
                let parent = if parent.is_empty() { "/" } else { parent };
                self.ensure_dir(parent, None)
            }
            _ => 0,
        };
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let index = self.push(
            parent,
            Node {
                id: id.unwrap_or_default().to_string(),
                kind: NodeKind::Dir {
                    path: path.clone(),
                    name,
                },
                children: Vec::new(),
            },
        );
        self.dirs.insert(path, index);
        index
    }

    pub fn add_file(&mut self, dir_path: &str, dir_id: &str, file: SavedFile) {
        let parent = self.ensure_dir(dir_path, Some(dir_id));
        let id = file.id.clone();
        let index = self.push(
            parent,
            Node {
                id: id.clone(),
                kind: NodeKind::File(file),
                children: Vec::new(),
            },
        );
        self.files.insert(id, index);
    }

    /// Records a rename that did not happen; the file keeps its original name.
    pub fn revert_name(&mut self, file_id: &str) {
        if let Some(&index) = self.files.get(file_id)
            && let NodeKind::File(file) = &mut self.nodes[index].kind
        {
            file.resolved = file.original.clone();
        }
    }

    /// A folder saved as a whole; its contents are not listed.
    pub fn add_dir(&mut self, parent_path: &str, parent_id: &str, id: &str, name: &str) {
        self.ensure_dir(parent_path, Some(parent_id));
        let path = format!("{}/{name}", clean(parent_path).trim_end_matches('/'));
        self.ensure_dir(&path, Some(id));
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn files(&self) -> impl Iterator<Item = &SavedFile> {
        self.nodes.iter().filter_map(|node| match &node.kind {
            NodeKind::File(file) => Some(file),
            NodeKind::Dir { .. } => None,
        })
    }

    /// Files paired with the path of their folder, depth first.
    pub fn files_with_dirs(&self) -> Vec<(&str, &SavedFile)> {
        let mut out = Vec::with_capacity(self.files.len());
        let mut stack = vec![(0usize, self.root_path())];
        while let Some((index, dir_path)) = stack.pop() {
            for &child in self.nodes[index].children.iter().rev() {
                match &self.nodes[child].kind {
                    NodeKind::Dir { path, .. } => stack.push((child, path.as_str())),
                    NodeKind::File(_) => stack.push((child, dir_path)),
                }
            }
            if let NodeKind::File(file) = &self.nodes[index].kind {
                out.push((dir_path, file));
            }
        }
        out
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Text rendering with box-drawing branches and category icons.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{DIR_ICON} {}", self.root_path());
        self.render_children(0, "", &mut out);
        out
    }

    fn render_children(&self, index: usize, prefix: &str, out: &mut String) {
        let children = &self.nodes[index].children;
        for (position, &child) in children.iter().enumerate() {
            let last = position + 1 == children.len();
            let branch = if last { "└── " } else { "├── " };
            let label = match &self.nodes[child].kind {
                NodeKind::Dir { name, .. } => format!("{DIR_ICON} {name}"),
                NodeKind::File(file) => format!("{} {}", file.category.icon(), file.resolved),
            };
            let _ = writeln!(out, "{prefix}{branch}{label}");
            let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
            self.render_children(child, &nested, out);
        }
    }

    fn push(&mut self, parent: usize, node: Node) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }
}

fn clean(path: &str) -> String {
    crate::remote::normalize_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, original: &str, resolved: &str) -> SavedFile {
        SavedFile {
            id: id.into(),
            original: original.into(),
            resolved: resolved.into(),
            category: FileCategory::from_name(resolved),
            size: 0,
            updated_at: None,
        }
    }

    #[test]
    fn detects_categories() {
        assert_eq!(FileCategory::from_name("a.MKV"), FileCategory::Video);
        assert_eq!(FileCategory::from_name("a.ass"), FileCategory::Subtitle);
        assert_eq!(FileCategory::from_name(".mkv"), FileCategory::Other);
        assert_eq!(FileCategory::from_name("noext"), FileCategory::Other);
        assert_eq!(FileCategory::detect(Some("video"), "x.bin"), FileCategory::Video);
        assert_eq!(FileCategory::detect(None, "x.flac"), FileCategory::Audio);
    }

    #[test]
    fn creates_missing_ancestors() {
        let mut tree = ResultTree::new("/TV/Show");
        assert!(tree.is_empty());
        tree.add_file("/TV/Show/Season 1/Part A", "pa", file("f1", "a.mkv", "S01E01.mkv"));
        tree.add_file("/TV/Show", "root", file("f2", "b.srt", "b.srt"));

        assert_eq!(tree.file_count(), 2);
        assert_eq!(
            tree.render(),
            "📁 /TV/Show\n\
             ├── 📁 Season 1\n\
             │   └── 📁 Part A\n\
             │       └── 🎞️ S01E01.mkv\n\
             └── 💬 b.srt\n"
        );
    }

    #[test]
    fn revert_name_restores_original() {
        let mut tree = ResultTree::new("/");
        tree.add_file("/", "0", file("f1", "raw.mkv", "EP01.mkv"));
        tree.add_dir("/", "0", "d1", "Extras");
        tree.revert_name("f1");
        assert!(tree.render().ends_with("└── 📁 Extras\n"));
        let saved: Vec<_> = tree.files().map(|f| f.resolved.as_str()).collect();
        assert_eq!(saved, ["raw.mkv"]);
    }
}
