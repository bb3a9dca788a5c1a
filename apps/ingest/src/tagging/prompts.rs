// Prompt constants for the Content Tagger.

/// Name of the single tool the model is forced to call.
pub const TAG_TOOL_NAME: &str = "record_tags";

pub const TAG_TOOL_DESCRIPTION: &str =
    "Record up to three tags for a joke or meme, chosen only from the allowed values.";

pub const TAG_SYSTEM: &str = "你是一个中文幽默内容的分类助手。\
    你只能通过调用 record_tags 工具作答，标签必须来自给定的枚举值。\
    最多选择三个标签：一个语气标签，最多两个主题标签，最多一个风格标签。";

/// Tagging prompt. Replace `{content}` before sending.
pub const TAG_PROMPT_TEMPLATE: &str = "请为下面的内容选择合适的标签。\n\n---\n{content}\n---";
