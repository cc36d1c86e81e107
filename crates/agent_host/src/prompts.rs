//! Prompt templates used by the dispatchers.
//!
//! Templates are static data with `{{name}}` placeholders; swapping one does
//! not require touching dispatch logic. [`replace_variable`] fills them in a
//! single pass, so substituted values are never re-expanded.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder pattern is valid")
});

/// Replace every `{{key}}` with its value. Unknown placeholders stay intact.
pub fn replace_variable(template: &str, vars: &[(&str, &str)]) -> String {
    let lookup: HashMap<&str, &str> = vars.iter().copied().collect();
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match lookup.get(key) {
                Some(value) => (*value).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ── Classification ───────────────────────────────────────────────────

/// Name of the function the structured classifier forces.
pub const CLASSIFY_FUNCTION_NAME: &str = "classify_question";

pub const CLASSIFY_FUNCTION_DESCRIPTION: &str =
    "结合历史对话记录的上下文环境和背景知识，对问题进行分类，并返回对应的类型字段";

pub const CLASSIFY_SYSTEM_PROMPT: &str = "作为问题分类的专家，你的任务是深入理解并分析用户的问题，结合当前的对话上下文和背景知识来做出最佳分类。在面对模糊或不明确的问题时，启用模糊匹配策略，将问题分配给最可能的类别。如果遇到无法确定的问题，请逐步推理，考虑问题的关键元素与已有类别之间的关联性，以提高分类准确性。你的目标是确保每个问题都能被恰当地引导和处理，以维持顺畅的对话体验。";

/// Human message of the structured classifier when background is supplied.
pub const CLASSIFY_BACKGROUND_QUESTION: &str = r#"<背景知识>
{{systemPrompt}}
</背景知识>

问题: "{{question}}""#;

/// Free-text classification template (`{{typeList}}` holds one JSON pair per line).
pub const CLASSIFY_JSON_PROMPT: &str = r#"我会给你几个问题类型，请参考背景知识（可能为空）和对话记录，判断我"本次问题"的类型，并返回一个问题"类型ID":
<问题类型>
{{typeList}}
</问题类型>

<背景知识>
{{systemPrompt}}
</背景知识>

<对话记录>
{{history}}
</对话记录>

Human："{{question}}"

类型ID=
"#;

// ── Query rewriting ──────────────────────────────────────────────────

/// Prefix stripped from user input before it is rewritten.
pub const CUSTOMER_QUESTION_PREFIX: &str = "### 客户问题 ###\n";

pub const REWRITE_SYSTEM_PROMPT: &str = r#"
### 指令 ###
我需要你扮演一个问题描述专家，负责重新概括和组织我提供给你的用户问题。你需要遵循以下7点具体的要求,各个要求具有优先级,优先级从上往下依次递减，注意，当符合第2条要求时，只执行第2条要求，跳过之后的其他要求,如下：
### 具体要求 ###
1. 不要回答任何问题，不要参考历史记录中的知识回答问题。
2. 注意识别用户问题是否是非常直截了当的询问，比如：什么是螺旋天线？或者 螺旋天线是什么？，则直接返回不经任何修改的用户问题。
3. 注意识别用户问题的情绪：用户问题是在表达情绪（如满意、赞赏、愤怒、不满等）时，直接返回不经任何修改的用户问题，不要再添加任何修饰词语或概括，这非常重要。
4. 描述问题时的身份和语气：注意描述问题时的身份和语气仅从历史记录中的用户问题部分参考，描述问题时，用“我”，而不是“您”。
5. 保持上下文的连续性：结合历史记录分析，确保重新描述用户问题时把问题描述清晰和准确，确保新描述能够自然地融入之前的对话。
6. 不要将非问句形式的问题强制转换为问句，不要将问句形式的用户问题转换成疑问句。
7. 具体化和精确化问题：如有必要，从历史记录中代入相应的代词和指代词以保持对话的一致性，如代词和指代词可能是用户询问过的某一产品型号或产品特性、技术参数等。

### 历史记录 ###
Q代表用户问题
A代表大语言模型的回答

下面我演示一些输出示例：

### 输出示例开始 ###

### 第1个输出示例 ###
用户问题: 你们有介质天线吗？
输出: 你们公司有介质天线吗？

### 第2个输出示例 ###
以下是历史记录:
Q: 你们有全向天线吗？
A: 您好！我们确实提供全向天线的产品。全向天线是一种……
以上是历史记录:
用户问题: 频率在2.4-2.48之间的产品推荐一下
输出: 频率在2.4-2.48GHz之间的全向天线产品推荐一下

### 第3个输出示例 ###
以下是历史记录:
Q: 频率在2.4-2.48GHz之间的全向天线产品推荐一下。
A: 根据您提供的需求，我为您推荐我们的单极子全向天线产品 HD-2425CVOA1S。该产品的频率范围为……
以上是历史记录:
用户问题: 非常棒！
输出: 非常棒！

### 第4个输出示例 ###
用户问题: HD-140SGACPHXS的技术参数
输出: 详细介绍一下HD-140SGACPHXS的技术参数

### 第5个输出示例 ###
以下是历史记录:
Q: 频率在2.4-2.48GHz之间的全向天线产品推荐一下。
A: 根据您提供的需求，我为您推荐我们的单极子全向天线产品 HD-2425CVOA1S。该产品的频率范围为……
以上是历史记录:
用户问题: 不符合我的要求
输出: 这款产品的天线口径不符合我的要求

### 第6个输出示例 ###
用户问题: 8-18GHz，增益17，2.92接头的产品有吗?
输出: 有频率范围在8至18 GHz，增益为17 dB，且配备2.92接头的产品吗？

### 第7个输出示例 ###
以下是历史记录:
Q: 您是否提供介质天线？
A: 是的，我们提供多种介质天线产品。介质天线通常用于……
以上是历史记录:
用户问题: 有没有频率在8.8-8.9的？具体产品指标是什么？
输出: 你们提供的介质天线中，是否有频率范围在8.8至8.9GHz的产品？详细介绍该频率段产品的具体技术指标。

### 第8个输出示例 ###
用户问题: 回答的太糟糕了
输出: 回答的太糟糕了

### 第9个输出示例 ###
用户问题: 回答的很好，谢谢
输出: 回答的很好，谢谢
"#;

pub const REWRITE_TASK_PROMPT: &str = r#"
现在，完成下面的新任务的输出：
PS：前面给的输出示例仅用来作为您的参考，不要将前面的输出示例中的任何历史记录带到下面的新任务中去，只参考下面新任务的历史记录，按照上述提到的要求生成输出：

### 任务 ###
以下是历史记录:
{{histories}}
以上是历史记录:
用户问题: {{query}}
输出:"#;

/// Marker prefix on the system context that selects retrieval-expansion mode.
pub const EXPANSION_MARKER: &str = "expand:";

pub const EXPANSION_SYSTEM_PROMPT: &str = r#"
### 指令 ###
你是一个检索查询扩展专家。请结合历史记录，把用户问题改写成最多3个不同的问法，用于扩大语义检索的召回范围。
### 具体要求 ###
1. 不要回答问题，只输出改写后的问题。
2. 每个问法保留用户问题中的全部关键信息，包括产品型号和技术参数。
3. 每行输出一个问法，并用英文双引号包裹，不要输出编号或其他内容。
"#;

pub const EXPANSION_TASK_PROMPT: &str = r#"
以下是历史记录:
{{histories}}
以上是历史记录:
用户问题: {{query}}
输出:"#;

// ── Question generation ──────────────────────────────────────────────

pub const OCR_SYSTEM_PROMPT: &str = "你是一个全能助手，帮助我出色的完成交代给你的任务。";

pub const OCR_QUESTION_PROMPT: &str = r#"以下是已知信息：

------------------------------------
{{message}}
------------------------------------

你是一个微波与毫米波行业的产品咨询/提问专家，请根据上面的提供的信息(技术参数要求/需求说明书/应用领域等)向{{recipient}}提出一个涵盖所有细节的的产品咨询/行业问题，细节要简单明了，不要重复啰嗦，特别是技术参数，生成的问题中要包含全部技术参数要求。

生成问题的语言请确保与信息中提供的语言一致(如果可以检测出)，检测不出语言时请生成中文问题。
请直接输出生成的问题。
"#;

pub const QUESTION_GUIDE_PROMPT: &str = r#"我不太清楚问你什么问题，请帮我生成 3 个问题，引导我继续提问。问题的长度应小于20个字符，按 JSON 格式返回: ["问题1", "问题2", "问题3"]"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_known_and_keep_unknown() {
        let out = replace_variable("{{a}} and {{b}} and {{c}}", &[("a", "1"), ("b", "2")]);
        assert_eq!(out, "1 and 2 and {{c}}");
    }

    #[test]
    fn test_values_are_not_reexpanded() {
        let out = replace_variable("{{query}}|{{histories}}", &[
            ("query", "{{histories}}"),
            ("histories", "H"),
        ]);
        assert_eq!(out, "{{histories}}|H");
    }

    #[test]
    fn test_templates_carry_their_placeholders() {
        assert!(REWRITE_TASK_PROMPT.contains("{{histories}}"));
        assert!(REWRITE_TASK_PROMPT.contains("{{query}}"));
        for key in ["typeList", "systemPrompt", "history", "question"] {
            assert!(CLASSIFY_JSON_PROMPT.contains(&format!("{{{{{key}}}}}")));
        }
        assert!(OCR_QUESTION_PROMPT.contains("{{message}}"));
        assert!(OCR_QUESTION_PROMPT.contains("向{{recipient}}提出"));
    }
}
