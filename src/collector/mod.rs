//! 파일 수집 모듈
//!
//! 수집 대상 문서 파일(PDF, 텍스트)을 파일/폴더 단위로 모읍니다.
//! .gitignore 패턴을 존중하고, 지원하는 확장자만 수집합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// 평문 텍스트 (txt, md)
    Text,
    /// PDF 파일
    Pdf,
}

impl FileType {
    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "md" | "text" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            _ => None,
        }
    }

    /// 파일 경로에서 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    pub file_type: FileType,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성 (지원하지 않는 확장자면 None)
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        let Some(file_type) = FileType::from_path(&path) else {
            return Ok(None);
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            file_type,
            size: metadata.len(),
        }))
    }

    /// 표시용 파일 이름
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 텍스트 파일 건너뛰기 (PDF만 수집)
    pub pdf_only: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 50 * 1024 * 1024, // 50MB (수백 페이지 법령 PDF)
            pdf_only: false,
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<Option<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.exists() {
            anyhow::bail!("File not found: {:?}", abs_path);
        }
        if !abs_path.is_file() {
            anyhow::bail!("Not a file: {:?}", abs_path);
        }

        Ok(CollectedFile::from_path(abs_path)?.filter(|f| self.should_include(f)))
    }

    /// 폴더 재귀 수집
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", abs_path);
        }

        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) if self.should_include(&file) => files.push(file),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        tracing::info!("Collected {} files from {:?}", files.len(), abs_path);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }
        if self.config.pdf_only && file.file_type != FileType::Pdf {
            return false;
        }
        true
    }
}

// ============================================================================
// Collection Stats
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub text_files: usize,
    pub pdf_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    pub fn from_files(files: &[CollectedFile]) -> Self {
        let mut stats = Self::default();
        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;
            match file.file_type {
                FileType::Text => stats.text_files += 1,
                FileType::Pdf => stats.pdf_files += 1,
            }
        }
        stats
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("txt"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("png"), None);
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn test_collect_directory_filters_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"text").unwrap();
        std::fs::write(dir.path().join("c.png"), b"img").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("d.pdf"), b"%PDF").unwrap();

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let names: Vec<String> = files.iter().map(|f| f.file_name()).collect();
        assert_eq!(names, vec!["a.pdf", "b.txt", "d.pdf"]);

        let stats = CollectionStats::from_files(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.pdf_files, 2);
        assert_eq!(stats.text_files, 1);
        assert_eq!(stats.total_size, 12);

        let pdf_only = FileCollector::new(CollectorConfig {
            pdf_only: true,
            ..Default::default()
        });
        assert_eq!(pdf_only.collect_directory(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_collect_file_size_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, vec![b'a'; 100]).unwrap();

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 10,
            ..Default::default()
        });
        assert!(collector.collect_file(&path).unwrap().is_none());
        assert!(FileCollector::with_defaults()
            .collect_file(&path)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_collect_missing_file() {
        assert!(FileCollector::with_defaults()
            .collect_file(Path::new("/definitely/not/here.pdf"))
            .is_err());
    }
}
