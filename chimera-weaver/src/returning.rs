//! 返回值形态识别与推进策略
//!
//! AfterReturning 阶段需要把 Around / AfterReturning 通知串到返回值上。
//! 同步值立即执行；future 与 stream 延迟到结果产生时再执行，调用方不会被阻塞。
//! 同步值与 future 只接受回写到连接点的返回值；stream 的每个元素映射为通知的结果。

use crate::error::{AopError, Result};
use crate::joinpoint::Joinpoint;
use chimera_ioc::{Output, Value};
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// 返回值形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturningType {
    Sync,
    Future,
    Stream,
}

impl ReturningType {
    /// 识别输出的形态
    pub fn of(output: &Output) -> Self {
        match output {
            Output::Sync(_) => ReturningType::Sync,
            Output::Future(_) => ReturningType::Future,
            Output::Stream(_) => ReturningType::Stream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReturningType::Sync => "sync",
            ReturningType::Future => "future",
            ReturningType::Stream => "stream",
        }
    }
}

impl fmt::Display for ReturningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对连接点执行一条通知，返回通知自己的结果
///
/// 调用前连接点的 `returning` 是当前值，调用后可能已被通知回写。
pub type AdviceAction = Arc<dyn Fn(&mut Joinpoint) -> Result<Option<Output>> + Send + Sync>;

/// 推进策略
pub trait Proceeding: Send + Sync {
    fn returning_type(&self) -> ReturningType;

    /// 把通知串到返回值上，返回调用方最终看到的输出
    fn proceed(&self, joinpoint: Joinpoint, output: Output, actions: Vec<AdviceAction>) -> Result<Output>;
}

/// 按形态选择策略
pub fn proceeding_for(returning_type: ReturningType) -> &'static dyn Proceeding {
    match returning_type {
        ReturningType::Sync => &SyncProceeding,
        ReturningType::Future => &FutureProceeding,
        ReturningType::Stream => &StreamProceeding,
    }
}

fn mismatch(expected: ReturningType, output: &Output) -> anyhow::Error {
    AopError::ReturningTypeMismatch {
        expected: expected.as_str(),
        actual: ReturningType::of(output).as_str(),
    }
    .into()
}

fn present(joinpoint: &mut Joinpoint, value: &Value) {
    joinpoint.set_returning(value.clone());
    joinpoint.set_returning_value(value.clone());
}

/// 使用回写到连接点的返回值，未回写时保持不变
fn written_back(joinpoint: &Joinpoint, current: Value) -> Value {
    joinpoint.returning().cloned().unwrap_or(current)
}

/// 同步值：立即依次执行
pub struct SyncProceeding;

impl Proceeding for SyncProceeding {
    fn returning_type(&self) -> ReturningType {
        ReturningType::Sync
    }

    fn proceed(&self, mut joinpoint: Joinpoint, output: Output, actions: Vec<AdviceAction>) -> Result<Output> {
        let mut value = match output {
            Output::Sync(value) => value,
            other => return Err(mismatch(ReturningType::Sync, &other)),
        };

        for action in actions {
            present(&mut joinpoint, &value);
            if let Some(result) = action(&mut joinpoint)? {
                tracing::trace!(
                    "Advice on '{}' returned a {} result, returning value unchanged",
                    joinpoint.full_name,
                    ReturningType::of(&result)
                );
            }
            value = written_back(&joinpoint, value);
        }
        Ok(Output::Sync(value))
    }
}

/// future：在结果完成后依次执行，最终值作为 future 的输出
pub struct FutureProceeding;

impl FutureProceeding {
    /// 等待通知自己的异步结果完成，结果本身不替换返回值
    async fn drain(output: Output) -> Result<()> {
        match output {
            Output::Sync(_) => Ok(()),
            Output::Future(future) => future.await.map(|_| ()),
            Output::Stream(mut items) => {
                while let Some(item) = items.next().await {
                    item?;
                }
                Ok(())
            }
        }
    }
}

impl Proceeding for FutureProceeding {
    fn returning_type(&self) -> ReturningType {
        ReturningType::Future
    }

    fn proceed(&self, joinpoint: Joinpoint, output: Output, actions: Vec<AdviceAction>) -> Result<Output> {
        let future = match output {
            Output::Future(future) => future,
            other => return Err(mismatch(ReturningType::Future, &other)),
        };
        if actions.is_empty() {
            return Ok(Output::Future(future));
        }

        let chained: BoxFuture<'static, Result<Value>> = async move {
            let mut joinpoint = joinpoint;
            let mut value = future.await?;
            for action in actions {
                present(&mut joinpoint, &value);
                if let Some(result) = action(&mut joinpoint)? {
                    Self::drain(result).await?;
                }
                value = written_back(&joinpoint, value);
            }
            tracing::trace!("Future returning chain of '{}' settled", joinpoint.full_name);
            Ok(value)
        }
        .boxed();
        Ok(Output::Future(chained))
    }
}

/// stream：每条通知通过 flat_map 作用到每个元素上
pub struct StreamProceeding;

impl StreamProceeding {
    fn apply(joinpoint: &Mutex<Joinpoint>, action: &AdviceAction, value: Value) -> BoxStream<'static, Result<Value>> {
        let mut joinpoint = joinpoint.lock();
        present(&mut *joinpoint, &value);
        match action(&mut *joinpoint) {
            Err(error) => stream::once(future::ready(Err(error))).boxed(),
            Ok(Some(Output::Sync(result))) => stream::once(future::ready(Ok(result))).boxed(),
            Ok(Some(Output::Future(pending))) => pending.into_stream().boxed(),
            Ok(Some(Output::Stream(nested))) => nested,
            Ok(None) => {
                let value = written_back(&*joinpoint, value);
                stream::once(future::ready(Ok(value))).boxed()
            }
        }
    }
}

impl Proceeding for StreamProceeding {
    fn returning_type(&self) -> ReturningType {
        ReturningType::Stream
    }

    fn proceed(&self, joinpoint: Joinpoint, output: Output, actions: Vec<AdviceAction>) -> Result<Output> {
        let mut items = match output {
            Output::Stream(items) => items,
            other => return Err(mismatch(ReturningType::Stream, &other)),
        };

        let joinpoint = Arc::new(Mutex::new(joinpoint));
        for action in actions {
            let joinpoint = Arc::clone(&joinpoint);
            items = items
                .flat_map(move |item| match item {
                    Ok(value) => Self::apply(&joinpoint, &action, value),
                    Err(error) => stream::once(future::ready(Err(error))).boxed(),
                })
                .boxed();
        }
        Ok(Output::Stream(items))
    }
}
