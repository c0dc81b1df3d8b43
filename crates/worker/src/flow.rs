//! 构造带执行流属性的任务消息

use riberry_core::{RiberryError, RiberryResult, TaskMessage, TaskProperties};

fn stream_name(stream: &str) -> RiberryResult<String> {
    let stream = stream.trim();
    if stream.is_empty() {
        return Err(RiberryError::Configuration("执行流名称不能为空".to_string()));
    }
    Ok(stream.to_string())
}

/// 开始一个执行流的任务
pub fn start(
    task_name: &str,
    args: serde_json::Value,
    stream: &str,
) -> RiberryResult<TaskMessage> {
    let mut properties = TaskProperties::stream(stream_name(stream)?);
    properties.stream_start = true;
    Ok(TaskMessage::new(task_name, args).with_properties(properties))
}

/// 执行流中的一个步骤
pub fn step(
    task_name: &str,
    args: serde_json::Value,
    stream: &str,
    step: &str,
) -> RiberryResult<TaskMessage> {
    let properties = TaskProperties::stream(stream_name(stream)?).with_step(step);
    Ok(TaskMessage::new(task_name, args).with_properties(properties))
}

/// 结束一个执行流的任务
pub fn end(task_name: &str, args: serde_json::Value, stream: &str) -> RiberryResult<TaskMessage> {
    let mut properties = TaskProperties::stream(stream_name(stream)?);
    properties.stream_end = true;
    Ok(TaskMessage::new(task_name, args).with_properties(properties))
}

/// 把消息串成链：前一个成功后发布下一个，尾部挂上 `link`，每一环都挂上 `link_error`
pub fn chain(
    messages: Vec<TaskMessage>,
    link: Vec<TaskMessage>,
    link_error: Vec<TaskMessage>,
) -> Option<TaskMessage> {
    let mut next: Option<TaskMessage> = None;
    for mut message in messages.into_iter().rev() {
        match next.take() {
            Some(following) => message.link.push(following),
            None => message.link.extend(link.iter().cloned()),
        }
        message.link_error.extend(link_error.iter().cloned());
        next = Some(message);
    }
    next
}
