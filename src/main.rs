// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # SCGI 网关服务器
//!
//! 启动流程：
//! - 初始化 log4rs 日志，配置文件缺失时退回控制台输出
//! - 读取 TOML 配置（第一个命令行参数可指定路径）
//! - 按配置的工作线程数构建 Tokio 运行时
//! - 注册内置处理器并启动监听
//! - Ctrl-C 或控制台 `stop` 指令触发优雅停机

use std::{future::pending, process, sync::Arc};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};

use scgi_gateway::{serve, Config, DebugDump, Gateway, Listener, Registry, WebSocket};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const DEFAULT_CONFIG: &str = "config/gateway.toml";

fn main() {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::from_toml(&path);
    info!("工作线程数: {}", config.worker_threads());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时: {}", e);
            process::exit(1);
        }
    };
    runtime.block_on(run(config));
}

fn init_logging() {
    let err = match log4rs::init_file(LOG_CONFIG, Default::default()) {
        Ok(()) => return,
        Err(e) => e,
    };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let fallback = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match fallback.map(log4rs::init_config) {
        Ok(Ok(_)) => warn!("无法载入日志配置{}: {}，使用控制台日志", LOG_CONFIG, err),
        Ok(Err(e)) => eprintln!("无法初始化日志系统: {}", e),
        Err(e) => eprintln!("无法构建日志配置: {}", e),
    }
}

async fn run(config: Config) {
    let mut registry = Registry::new();
    registry
        .register("websocket", || Arc::new(WebSocket))
        .register("debug", || Arc::new(DebugDump));
    let gateway = Arc::new(Gateway::from_config(&config, registry));

    let listener = match Listener::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定监听地址，错误：{}", e);
            process::exit(1);
        }
    };

    let console_gateway = Arc::clone(&gateway);
    serve(listener, gateway, async move {
        tokio::select! {
            _ = wait_ctrl_c() => info!("收到Ctrl-C，开始停机"),
            _ = console(console_gateway) => info!("停机指令已激活，不再接受新连接"),
        }
    })
    .await;
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("无法监听Ctrl-C信号: {}", e);
        pending::<()>().await;
    }
}

/// 交互式管理控制台，收到 `stop` 时返回。标准输入关闭后不再返回。
async fn console(gateway: Arc<Gateway>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return pending().await,
        };
        match line.trim() {
            "stop" => return,
            "status" => {
                println!("== Gateway 状态 ===");
                println!("当前活跃连接数: {}", gateway.active_connections());
                println!("已缓存处理器数: {}", gateway.router().registry().cache().len());
                println!("===================");
            }
            "help" => {
                println!("== Gateway Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("==================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
