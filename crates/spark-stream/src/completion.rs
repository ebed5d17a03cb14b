//! 完成记录与交付策略。
//!
//! 每个流操作恰好产出一条 [`Completion`]，与调用方交出的缓冲区一起打包为 [`Transfer`]。
//! 默认采用“值”策略：错误只是记录中的一个字段，调用方自行检查；
//! 以 [`raising`] 包装令牌后切换为“抛出”策略，结果变为 `Result<Transfer<B>, TransferError<B>>`。
//! 两种策略针对同一次调用互斥，不会同时生效。

use std::fmt;

use spark_executor::{CompletionToken, Handler};

use crate::error::StreamError;

/// 单次操作的完成记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// `None` 表示成功。
    pub error: Option<StreamError>,
    /// 实际传输的字节数，出错时也可能非零。
    pub transferred: usize,
}

impl Completion {
    pub fn ok(transferred: usize) -> Self {
        Self {
            error: None,
            transferred,
        }
    }

    pub fn failed(error: StreamError, transferred: usize) -> Self {
        Self {
            error: Some(error),
            transferred,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 完成记录与调用方缓冲区的组合。
///
/// 读操作中 `buffer` 的前 `completion.transferred` 字节为本次读到的数据；
/// 写操作中 `buffer` 原样归还，已写入的是其前 `transferred` 字节。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer<B> {
    pub completion: Completion,
    pub buffer: B,
}

impl<B> Transfer<B> {
    pub fn new(completion: Completion, buffer: B) -> Self {
        Self { completion, buffer }
    }

    pub fn transferred(&self) -> usize {
        self.completion.transferred
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.completion.error.as_ref()
    }

    /// 切换到“抛出”策略。
    pub fn into_result(self) -> Result<Self, TransferError<B>> {
        match self.completion.error {
            None => Ok(self),
            Some(error) => Err(TransferError {
                error,
                transferred: self.completion.transferred,
                buffer: self.buffer,
            }),
        }
    }
}

impl Transfer<Vec<u8>> {
    /// 本次读到的字节。
    pub fn filled(&self) -> &[u8] {
        let end = self.completion.transferred.min(self.buffer.len());
        &self.buffer[..end]
    }
}

/// “抛出”策略下的错误：携带错误本身、已传输字节数与归还的缓冲区。
#[derive(Debug)]
pub struct TransferError<B> {
    pub error: StreamError,
    pub transferred: usize,
    pub buffer: B,
}

impl<B> fmt::Display for TransferError<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (after transferring {} bytes)",
            self.error, self.transferred
        )
    }
}

impl<B: fmt::Debug> std::error::Error for TransferError<B> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// 把内层令牌切换为“抛出”策略的适配器，见 [`raising`]。
#[derive(Clone, Copy, Debug)]
pub struct Raising<K>(K);

/// 让操作以 `Result<Transfer<B>, TransferError<B>>` 交付结果。
///
/// ```
/// use spark_executor::use_blocking;
/// use spark_stream::raising;
///
/// let _token = raising(use_blocking());
/// ```
pub fn raising<K>(token: K) -> Raising<K> {
    Raising(token)
}

impl<B, K> CompletionToken<Transfer<B>> for Raising<K>
where
    B: Send + 'static,
    K: CompletionToken<Result<Transfer<B>, TransferError<B>>>,
{
    type Output = K::Output;

    fn initiate<L>(self, launch: L) -> K::Output
    where
        L: FnOnce(Handler<Transfer<B>>),
    {
        self.0
            .initiate(|handler| launch(handler.map(Transfer::into_result)))
    }
}
