//! オフラインファースト同期エンジン。
//!
//! ミューテーションはまずローカルキャッシュに適用され、永続キューに積まれる。
//! 接続が戻るとキューを先頭から順にリモートのドキュメントストアへ流し込む。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
