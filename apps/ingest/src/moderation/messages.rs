// Comments posted on submission issues. One template per outcome.

pub const APPROVED_COMMENT: &str = "\
感谢投稿！🎉 内容已通过自动审核，将在下次同步后出现在网站上。";

pub const EMPTY_CONTENT_COMMENT: &str = "\
投稿内容为空（没有文字也没有图片），已转入人工审核。请编辑 issue 补充内容。";

pub const REVIEW_UNAVAILABLE_COMMENT: &str = "\
自动审核暂时不可用，投稿已转入人工审核，请耐心等待。";

pub const FLAGGED_UNMAPPED_COMMENT: &str = "\
自动审核对该投稿给出了提示，但无法确定具体类别，已转入人工审核。";

pub const EMPTY_CONTENT_MESSAGE: &str = "empty content needs manual review";
pub const REVIEW_UNAVAILABLE_MESSAGE: &str = "automatic review unavailable";
pub const FLAGGED_UNMAPPED_MESSAGE: &str = "flagged without a mapped category, needs manual review";
pub const APPROVED_MESSAGE: &str = "content approved";

pub fn duplicate_comment(link: &str) -> String {
    format!("这条投稿与已有内容重复或高度相似：{link}\n\n如果你认为这是误判，请在评论中说明。")
}

pub fn violation_comment(labels: &[&str]) -> String {
    format!(
        "投稿未通过自动审核，检测到以下问题：{}。\n\n如果你认为这是误判，请在评论中说明。",
        labels.join("、")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_comment_lists_labels() {
        let comment = violation_comment(&["骚扰", "暴力"]);
        assert!(comment.contains("骚扰、暴力"));
    }

    #[test]
    fn test_duplicate_comment_links_item() {
        assert!(duplicate_comment("https://jokes.example/1").contains("https://jokes.example/1"));
    }
}
