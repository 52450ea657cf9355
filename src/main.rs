/*!
 * Feishu Bot - 飞书机器人 Webhook 服务
 *
 * 这是应用程序的主入口点，负责：
 * - 加载环境配置
 * - 初始化服务器
 * - 启动 HTTP 服务
 */

use feishu_bot::{config::Settings, server::Server, AppResult};

/// 应用程序主入口点
///
/// 配置只在这里构造一次，之后以只读方式传给各个组件。
/// 数据库不可用时启动直接失败，进程以非零状态退出。
#[tokio::main]
async fn main() -> AppResult<()> {
    let settings = Settings::from_env()?;

    let server = Server::new(settings);

    server.run().await
}
