//! Closed tag taxonomy. Conceptually one tone tag, up to two theme tags and
//! up to one style tag per item; only the total count and membership are
//! enforced.

pub const MAX_TAGS: usize = 3;

/// Stored when the model answered but nothing it returned is in the taxonomy.
pub const FALLBACK_TAG: &str = "其他";

pub const TONE_TAGS: &[&str] = &["冷笑话", "讽刺", "自嘲", "温馨", "无厘头", "黑色幽默"];

pub const THEME_TAGS: &[&str] = &[
    "职场", "校园", "爱情", "家庭", "程序员", "动物", "生活", "社会", "科技", "美食", "游戏",
    "体育",
];

pub const STYLE_TAGS: &[&str] = &["谐音梗", "反转", "段子", "对话体", "吐槽", "梗图"];

pub fn all_tags() -> impl Iterator<Item = &'static str> {
    TONE_TAGS
        .iter()
        .chain(THEME_TAGS)
        .chain(STYLE_TAGS)
        .copied()
}

pub fn is_known(tag: &str) -> bool {
    all_tags().any(|t| t == tag)
}

/// Model output after validation against the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedTags {
    /// 1..=3 distinct taxonomy members, in the model's order.
    Known(Vec<String>),
    /// The model answered with nothing usable.
    NoneKnown,
}

impl ValidatedTags {
    pub fn into_tags(self) -> Vec<String> {
        match self {
            ValidatedTags::Known(tags) => tags,
            ValidatedTags::NoneKnown => vec![FALLBACK_TAG.to_string()],
        }
    }
}

/// Keeps known tags (deduplicated, order preserved), capped at [`MAX_TAGS`].
pub fn validate<I, S>(raw: I) -> ValidatedTags
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = Vec::with_capacity(MAX_TAGS);
    for tag in raw {
        let tag = tag.as_ref().trim();
        if is_known(tag) && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
            if tags.len() == MAX_TAGS {
                break;
            }
        }
    }
    if tags.is_empty() {
        ValidatedTags::NoneKnown
    } else {
        ValidatedTags::Known(tags)
    }
}
