//! 交互层入口（控制台命令循环）。

pub mod noui;
