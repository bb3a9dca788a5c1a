/// Reviewer-facing labels for classifier category codes. Codes missing here
/// are not shown to the submitter.
const CATEGORY_LABELS: &[(&str, &str)] = &[
    ("sexual", "色情内容"),
    ("sexual/minors", "涉及未成年人的色情内容"),
    ("harassment", "骚扰"),
    ("harassment/threatening", "威胁性骚扰"),
    ("hate", "仇恨言论"),
    ("hate/threatening", "威胁性仇恨言论"),
    ("illicit", "违法行为"),
    ("illicit/violent", "暴力违法行为"),
    ("self-harm", "自我伤害"),
    ("self-harm/intent", "自我伤害意图"),
    ("self-harm/instructions", "自我伤害指导"),
    ("violence", "暴力"),
    ("violence/graphic", "血腥暴力"),
];

pub fn label_for(code: &str) -> Option<&'static str> {
    CATEGORY_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Labels for the given codes, in input order, unmapped codes dropped.
pub fn mapped_labels<'a, I>(codes: I) -> Vec<&'static str>
where
    I: IntoIterator<Item = &'a String>,
{
    codes.into_iter().filter_map(|c| label_for(c)).collect()
}
