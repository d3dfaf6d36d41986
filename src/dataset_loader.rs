//! # 数据加载
//!
//! - [`TextCorpus`]: 语言模型的训练文本，来自 JSON 字符串数组或一个目录下的所有文件
//! - [`read_dir_recursive`]: 按文件名顺序深度优先遍历目录
//! - [`load_labeled_examples`]: `<root>/<label>/<file>` 布局的分类样本

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    classifier::Example,
    error::{ModelError, Result},
    features::FeatureExtractor,
};

/// 语言模型训练文本
#[derive(Clone, Debug, Default)]
pub struct TextCorpus {
    pub texts: Vec<String>,
}

impl TextCorpus {
    /// 读取 JSON 字符串数组，例如 `["第一段", "第二段"]`
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data_json = fs::read_to_string(path)?;
        let texts: Vec<String> = serde_json::from_str(&data_json)?;
        log::info!("从 {} 加载了 {} 条文本", path.display(), texts.len());
        Ok(Self { texts })
    }

    /// 目录下的每个文件作为一条文本，非 UTF-8 字节按替换字符处理
    pub fn from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let texts: Vec<String> = read_dir_recursive(root)?
            .into_iter()
            .map(|file| String::from_utf8_lossy(&file.data).into_owned())
            .collect();
        log::info!("从目录 {} 加载了 {} 个文本文件", root.display(), texts.len());
        Ok(Self { texts })
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// 目录遍历得到的一个文件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirFile {
    /// 相对根目录的路径分量，最后一项为文件名
    pub components: Vec<String>,
    pub data: Vec<u8>,
}

impl DirFile {
    pub fn display_path(&self) -> String {
        self.components.join("/")
    }
}

/// **递归读取目录**
///
/// 同一目录内按文件名排序，遇到子目录时先进入子目录（深度优先）。
pub fn read_dir_recursive<P: AsRef<Path>>(root: P) -> Result<Vec<DirFile>> {
    let mut files = Vec::new();
    walk(root.as_ref(), &mut Vec::new(), &mut files)?;
    Ok(files)
}

fn walk(dir: &Path, prefix: &mut Vec<String>, out: &mut Vec<DirFile>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        prefix.push(name);
        if path.is_dir() {
            walk(&path, prefix, out)?;
        } else {
            out.push(DirFile {
                components: prefix.clone(),
                data: fs::read(&path)?,
            });
        }
        prefix.pop();
    }
    Ok(())
}

/// 父目录名即类别编号
pub fn parse_label(file: &DirFile) -> Result<usize> {
    let label_error = |reason: String| ModelError::Label {
        path: file.display_path(),
        reason,
    };

    let parent = file
        .components
        .len()
        .checked_sub(2)
        .and_then(|i| file.components.get(i))
        .ok_or_else(|| label_error("文件不在类别子目录中".to_string()))?;

    parent
        .parse::<usize>()
        .map_err(|e| label_error(format!("目录名 `{}` 不是类别编号: {}", parent, e)))
}

/// **加载分类样本**
///
/// 目录布局为 `<root>/<label>/<file>`，每个文件经 `extractor` 转换为特征。
pub fn load_labeled_examples<P: AsRef<Path>>(
    root: P,
    extractor: &dyn FeatureExtractor,
) -> Result<Vec<Example>> {
    let root = root.as_ref();
    let examples = read_dir_recursive(root)?
        .iter()
        .map(|file| {
            Ok(Example {
                label: parse_label(file)?,
                input: extractor.extract(&file.data)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    log::info!("从 {} 加载了 {} 个分类样本", root.display(), examples.len());
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(components: &[&str]) -> DirFile {
        DirFile {
            components: components.iter().map(|c| c.to_string()).collect(),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label(&file(&["train", "7", "a.raw"])).unwrap(), 7);
        assert_eq!(parse_label(&file(&["3", "b.raw"])).unwrap(), 3);
    }

    #[test]
    fn test_parse_label_errors() {
        assert!(matches!(
            parse_label(&file(&["a.raw"])),
            Err(ModelError::Label { .. })
        ));
        assert!(matches!(
            parse_label(&file(&["cats", "a.raw"])),
            Err(ModelError::Label { .. })
        ));
    }
}
