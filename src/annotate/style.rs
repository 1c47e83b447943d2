// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 类别 → 显示文字/颜色 映射

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AnnotationConfig;

/// 单个类别的显示样式
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelStyle {
    pub text: String,
    pub color: [u8; 3],
}

impl LabelStyle {
    pub fn new(text: impl Into<String>, color: [u8; 3]) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

/// 解析后的样式 (借用映射表或原始类别名)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedStyle<'a> {
    pub text: &'a str,
    pub color: [u8; 3],
}

/// 样式映射表, 未登记的类别使用原类别名 + 中性色
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleMap {
    styles: BTreeMap<String, LabelStyle>,
    fallback_color: [u8; 3],
}

impl Default for StyleMap {
    fn default() -> Self {
        Self::new([255, 255, 255])
    }
}

impl StyleMap {
    pub fn new(fallback_color: [u8; 3]) -> Self {
        Self {
            styles: BTreeMap::new(),
            fallback_color,
        }
    }

    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self {
            styles: config.labels.clone(),
            fallback_color: config.fallback_color,
        }
    }

    pub fn with_style(mut self, class_name: impl Into<String>, style: LabelStyle) -> Self {
        self.insert(class_name, style);
        self
    }

    pub fn insert(&mut self, class_name: impl Into<String>, style: LabelStyle) {
        self.styles.insert(class_name.into(), style);
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn resolve<'a>(&'a self, class_name: &'a str) -> ResolvedStyle<'a> {
        match self.styles.get(class_name) {
            Some(style) => ResolvedStyle {
                text: &style.text,
                color: style.color,
            },
            None => ResolvedStyle {
                text: class_name,
                color: self.fallback_color,
            },
        }
    }
}
