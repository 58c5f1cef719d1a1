//! 成员调用接口
//!
//! 目标类型的方法与访问器都以 [`Invocable`] 的形式存在，
//! 织入层通过包装同一个接口来安装代理，而不是在运行时改写成员。

use crate::error::{IocError, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 调用参数与返回值使用的动态值
pub use serde_json::Value;

/// 调用接收者（目标实例）
pub type Target = Arc<dyn Any + Send + Sync>;

/// 成员调用的输出
///
/// 同步值、异步 future、流三种形态在调用约定上是等价的，
/// 由调用方（或织入层）决定如何继续处理。
pub enum Output {
    /// 同步返回值
    Sync(Value),

    /// 异步结果，类似 Promise
    Future(BoxFuture<'static, Result<Value>>),

    /// 值序列，类似 Observable
    Stream(BoxStream<'static, Result<Value>>),
}

impl Output {
    /// 同步值
    pub fn value(value: impl Into<Value>) -> Self {
        Output::Sync(value.into())
    }

    /// 空返回值
    pub fn unit() -> Self {
        Output::Sync(Value::Null)
    }

    /// 包装一个 future
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Output::Future(future.boxed())
    }

    /// 包装一个流
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        Output::Stream(stream.boxed())
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, Output::Sync(_))
    }

    /// 取出同步值，异步形态返回 None
    pub fn into_sync(self) -> Option<Value> {
        match self {
            Output::Sync(value) => Some(value),
            _ => None,
        }
    }

    /// 等待输出完成
    ///
    /// 流会被完整消费，结果收集为数组。
    pub async fn resolve(self) -> Result<Value> {
        match self {
            Output::Sync(value) => Ok(value),
            Output::Future(future) => future.await,
            Output::Stream(mut stream) => {
                let mut items = Vec::new();
                while let Some(item) = stream.next().await {
                    items.push(item?);
                }
                Ok(Value::Array(items))
            }
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Sync(value) => f.debug_tuple("Sync").field(value).finish(),
            Output::Future(_) => write!(f, "Future(..)"),
            Output::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// 可调用成员
///
/// 原始方法和织入后的代理都实现这个 trait。
pub trait Invocable: Send + Sync {
    /// 以 `target` 为接收者调用成员
    fn invoke(&self, target: &Target, args: Vec<Value>) -> Result<Output>;
}

type RawMethod = dyn Fn(&Target, Vec<Value>) -> Result<Output> + Send + Sync;

/// 基于闭包的成员实现
#[derive(Clone)]
pub struct MethodFn {
    type_name: &'static str,
    func: Arc<RawMethod>,
}

impl MethodFn {
    /// 使用未类型化的闭包创建
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Target, Vec<Value>) -> Result<Output> + Send + Sync + 'static,
    {
        Self {
            type_name: "dyn Any",
            func: Arc::new(func),
        }
    }

    /// 创建一个要求接收者为 `T` 的成员
    pub fn typed<T, F>(func: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, Vec<Value>) -> Result<Output> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        Self {
            type_name,
            func: Arc::new(move |target: &Target, args: Vec<Value>| {
                let this = target
                    .downcast_ref::<T>()
                    .ok_or(IocError::TargetMismatch { expected: type_name })?;
                func(this, args)
            }),
        }
    }
}

impl Invocable for MethodFn {
    fn invoke(&self, target: &Target, args: Vec<Value>) -> Result<Output> {
        (self.func)(target, args)
    }
}

impl fmt::Debug for MethodFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodFn")
            .field("receiver", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    struct Counter {
        step: i64,
    }

    #[test]
    fn test_typed_method_downcasts_receiver() {
        let method = MethodFn::typed(|this: &Counter, args: Vec<Value>| {
            let base = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Output::value(base + this.step))
        });

        let target: Target = Arc::new(Counter { step: 2 });
        let output = method.invoke(&target, vec![json!(40)]).unwrap();
        assert_eq!(output.into_sync(), Some(json!(42)));
    }

    #[test]
    fn test_typed_method_rejects_foreign_receiver() {
        let method = MethodFn::typed(|_: &Counter, _| Ok(Output::unit()));
        let target: Target = Arc::new(String::from("not a counter"));

        let err = method.invoke(&target, Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IocError>(),
            Some(IocError::TargetMismatch { .. })
        ));
    }

    #[test]
    fn test_resolve_async_outputs() {
        let future = Output::future(async { Ok(json!("done")) });
        assert_eq!(block_on(future.resolve()).unwrap(), json!("done"));

        let stream = Output::stream(futures::stream::iter(vec![Ok(json!(1)), Ok(json!(2))]));
        assert_eq!(block_on(stream.resolve()).unwrap(), json!([1, 2]));
    }
}
